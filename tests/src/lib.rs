// Faultline Tests
//
// Holds the end-to-end suites; the shared fixtures live in common/mod.rs
