//! Test doubles shared by unit and integration tests.

mod mock_executor;

pub use mock_executor::MockExecutor;
