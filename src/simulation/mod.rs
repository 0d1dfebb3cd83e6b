pub mod events;
pub mod rule_eval;
pub mod scheduler;
pub mod task_exec;

pub use events::{Event, EventBus};
pub use rule_eval::{
    check_antecedents, check_expression, evaluate_expression, resolve_value, select_consequents,
    Scope,
};
pub use scheduler::{Clock, ManualClock, Model, Renderer, SystemClock, TimeoutId};
