//! Benchmarks for frost. Run with `cargo bench -p frost-bench`.
