//! Tablo DVR cache synchronizer
//!
//! See [`dvr`] for the per-appliance cache, refresh and conflict handling.

pub mod dvr;
