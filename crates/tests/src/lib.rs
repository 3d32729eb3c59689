//! Integration tests for the card model; see the `tests/` directory.
