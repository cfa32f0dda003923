//! Collector thread for values dropped on the audio thread
//!
//! Anything the audio thread can replace (sources, reels, scratch buffers)
//! is allocated as `basedrop::Owned` against [`gc_handle`]. Dropping it
//! pushes a pointer onto the collector's queue; "spool-gc" frees it later.

use basedrop::{Collector, Handle};
use std::sync::{mpsc, OnceLock};
use std::thread;
use std::time::Duration;

const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Start the collector and hand back its handle
///
/// `Collector` is not `Sync`; it stays on the thread that collects.
fn spawn_collector() -> Handle {
    let (handle_tx, handle_rx) = mpsc::sync_channel(1);

    thread::Builder::new()
        .name("spool-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();
            handle_tx
                .send(collector.handle())
                .expect("collector handle receiver dropped");
            drop(handle_tx);
            log::info!("GC: collector running every {:?}", COLLECT_INTERVAL);

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("failed to spawn spool-gc thread");

    handle_rx.recv().expect("spool-gc exited before sending its handle")
}

/// Process-wide collector handle, starting the thread on first call
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(spawn_collector).clone()
}
