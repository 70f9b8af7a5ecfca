pub mod error_classifier;
pub mod r#loop;
pub mod response;
pub mod session;
pub mod steps;

pub use error_classifier::*;
pub use r#loop::*;
pub use response::{normalize, strip_code_fence, SqlCandidate};
pub use session::*;
pub use steps::*;
