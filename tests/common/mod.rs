#![allow(dead_code)]

pub(crate) mod executor;

pub(crate) mod fixtures;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod mock_core;

pub(crate) mod mock_zmq;
