//! Integration tests for qmsync-http
//!
//! Uses wiremock to simulate the table endpoints and verifies request
//! shapes, response validation and error classification.

mod common;

mod test_probe;
mod test_pull;
mod test_push;
