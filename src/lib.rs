// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod backoff;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod handler;
pub mod supervisor;
pub mod topology;
