//! Integration-style tests that exercise more than one subsystem at a time.
//! Per-module unit tests live next to the code they cover instead.
