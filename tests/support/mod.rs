#![allow(dead_code)]

pub mod fake_client;
pub mod socket_guard;
