//! Declarative rule content: values, compiled statements and the compiler

pub mod compile;
pub mod statement;
pub mod value;

pub use compile::{compile_calculated_properties, compile_species, compile_species_list};
pub use statement::{Antecedent, Comparator, Expression, Rule, Statement, TaskBundle};
pub use value::Value;
