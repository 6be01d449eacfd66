pub mod settings;

pub use settings::NetworkSettings;
