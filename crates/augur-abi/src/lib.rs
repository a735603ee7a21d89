pub mod coerce;
pub mod parse;
pub mod selector;
pub mod table;
pub mod types;
