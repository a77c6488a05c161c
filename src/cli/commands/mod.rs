pub mod interviews;
pub mod provision;
pub mod queue;
pub mod reference;
pub mod settings;
pub mod status;
