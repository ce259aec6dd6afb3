use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config value out of range: {name} = {value} ({reason})")]
    ConfigOutOfRange {
        name: &'static str,
        value: f32,
        reason: &'static str,
    },
}
