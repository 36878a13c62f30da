pub mod assessment;
pub mod hospital;
pub mod patient;
pub mod stimulus;

pub use assessment::*;
pub use hospital::*;
pub use patient::*;
pub use stimulus::*;
