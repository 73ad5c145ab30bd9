use super::container::Container;

/// Profile as exposed to the mixer: one entry per base name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixerProfile {
    pub name: String,
    /// Container profiles sharing this base name, in container order
    pub variants: Vec<usize>,
}

/// Maps mixer profile indices to container profiles per sample rate.
/// Calibration profiles are never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileTable {
    entries: Vec<MixerProfile>,
}

impl ProfileTable {
    pub fn from_container(container: &Container) -> Self {
        let mut entries: Vec<MixerProfile> = Vec::new();
        for (index, profile) in container.profiles.iter().enumerate() {
            if profile.calibration {
                continue;
            }
            let base = profile.base_name();
            match entries.iter_mut().find(|e| e.name == base) {
                Some(entry) => entry.variants.push(index),
                None => entries.push(MixerProfile {
                    name: base.to_string(),
                    variants: vec![index],
                }),
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, mixer: usize) -> Option<&MixerProfile> {
        self.entries.get(mixer)
    }

    /// Mixer entry holding the given container profile
    pub fn mixer_index_of(&self, container_profile: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.variants.contains(&container_profile))
    }

    /// Container profile of `mixer` that can run at `rate`
    pub fn resolve(&self, container: &Container, mixer: usize, rate: u32) -> Option<usize> {
        self.entries.get(mixer)?.variants.iter().copied().find(|index| {
            container
                .profile(*index)
                .map(|p| p.supports_rate(rate))
                .unwrap_or(false)
        })
    }
}
