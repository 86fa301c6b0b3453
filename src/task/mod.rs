pub mod execution_plan;
pub mod optimizer;
pub mod resolver;
pub mod types;


pub use execution_plan::*;
pub use optimizer::*;
pub use resolver::*;
pub use types::*;
