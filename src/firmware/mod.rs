pub mod container;
pub mod loader;
pub mod profiles;
pub mod source;

pub use container::{Container, Profile};
pub use loader::ContainerLoader;
pub use profiles::{MixerProfile, ProfileTable};
pub use source::FileFirmwareSource;
