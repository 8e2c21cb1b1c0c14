//! End-to-end tests for `correio-core` live under `tests/`.
