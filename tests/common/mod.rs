#![allow(dead_code)]

pub use runvisor_test_utils::builders;
pub use runvisor_test_utils::fake_output;
pub use runvisor_test_utils::runs;
pub use runvisor_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
