//! Vietnamese tone trainer: adaptive listening quiz engine, speak/record
//! controllers and the axum service that hosts them.

pub mod audio;
pub mod config;
pub mod corpus;
pub mod difficulty;
pub mod domain;
pub mod evaluation;
pub mod logic;
pub mod notice;
pub mod openai;
pub mod protocol;
pub mod quiz;
pub mod recorder;
pub mod routes;
pub mod session;
pub mod speak;
pub mod state;
pub mod telemetry;
pub mod tts;
pub mod util;
