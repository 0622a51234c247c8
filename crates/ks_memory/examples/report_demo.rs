//! Allocate from a handful of sites and print the operator report.
//!
//! ```sh
//! cargo run --example report_demo
//! ```

#![allow(unsafe_code)]

use ks_memory::{MonitorConfig, track_alloc, track_realloc, track_strdup, tracked_free};

fn main() {
    env_logger::init();

    ks_memory::initialize("demo-server", &MonitorConfig::ENABLED);

    let mut blocks = Vec::new();
    unsafe {
        for _ in 0..4 {
            blocks.push(track_alloc!(64 * 1024));
        }

        let grown = track_realloc!(track_alloc!(1024), 256 * 1024);
        blocks.push(grown);

        let name = track_strdup!(c"demo-server".as_ptr());

        print!("{}", ks_memory::aggregate_server_info());

        tracked_free(name.cast());
        for block in blocks {
            tracked_free(block);
        }
    }

    ks_memory::finalize();
}
