//! Gridbot Property-Based Tests
//!
//! Standalone test suite using proptest for kernel invariants.
//! This project is isolated from the main gridbot crate.
//!
//! # Usage
//!
//! ```bash
//! cargo test -p gridbot-property-tests            # Run all property tests
//! cargo test -p gridbot-property-tests scheduler  # Run only scheduler tests
//! cargo test -- --nocapture                       # Show output
//! PROPTEST_CASES=1000 cargo test                  # More test cases
//! ```
//!
//! # Test Modules
//!
//! - `fsm`: hook ordering across switches, bounds
//! - `scheduler`: priority ordering, first claim wins, removal
//! - `protocol`: frame layout, request fields, status report, node rotation
//! - `sensors`: threshold masks

// Re-export for convenience in tests
pub use gridbot::*;
