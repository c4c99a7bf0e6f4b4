pub mod handle_scan;

pub use handle_scan::{
    list_scans_handler, scan_findings_handler, scan_status_handler,
    start_scan_handler, stop_scan_handler,
};
