pub mod config;
pub mod decode;
pub mod engine;
pub mod fetch;
pub mod model;
pub mod providers;
pub mod server;
pub mod store;
pub mod timetable;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
