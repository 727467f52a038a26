// Tests that drive a whole old generation through `MockVM`.
//
// Each test creates its own instance with `leak_cms`.  The mock and the mutator gate are global,
// so `with_mockvm` runs the tests one at a time.

#[cfg(feature = "mock_test")]
mod mock_tests;
