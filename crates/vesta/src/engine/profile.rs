//! User profiles, each with its own home.

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use super::state::DeviceState;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 8;

/// Names of the profiles created when nothing has been stored yet.
pub const FALLBACK_PROFILES: [&str; 2] = ["Alex", "Sam"];

/// Per-profile defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDefaults {
    /// Room assumed when a command names none.
    pub room: String,

    /// BCP 47 tag handed to the speech collaborator.
    pub language: String,

    /// Thermostat target for a freshly created home.
    pub temperature: i32,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            room: "bedroom".to_string(),
            language: "en-IN".to_string(),
            temperature: 72,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub defaults: ProfileDefaults,
    pub state: DeviceState,
}

impl Profile {
    pub fn new<R: Rng + ?Sized>(name: &str, defaults: ProfileDefaults, rng: &mut R) -> Self {
        let suffix: String = (0..ID_LEN)
            .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
            .collect();
        let state = DeviceState::default_home(defaults.temperature);
        Self {
            id: format!("p_{}", suffix),
            name: name.to_string(),
            defaults,
            state,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("no profile with id '{0}'")]
    NotFound(String),

    #[error("cannot delete the last remaining profile")]
    LastProfile,
}

/// The set of known profiles and which one is active.
///
/// Never empty; the active profile is the one selected, or the first.
#[derive(Debug)]
pub struct ProfileStore {
    profiles: Vec<Profile>,
    active: Option<String>,
}

impl ProfileStore {
    /// Wrap loaded profiles, seeding the fallback pair if there are none.
    ///
    /// The flag is true when the fallback profiles were created.
    pub fn load_or_seed<R: Rng + ?Sized>(
        profiles: Vec<Profile>,
        defaults: &ProfileDefaults,
        rng: &mut R,
    ) -> (Self, bool) {
        if !profiles.is_empty() {
            return (
                Self {
                    profiles,
                    active: None,
                },
                false,
            );
        }

        let profiles = FALLBACK_PROFILES
            .iter()
            .map(|name| Profile::new(name, defaults.clone(), rng))
            .collect();
        (
            Self {
                profiles,
                active: None,
            },
            true,
        )
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    fn active_index(&self) -> usize {
        self.active
            .as_ref()
            .and_then(|id| self.profiles.iter().position(|p| &p.id == id))
            .unwrap_or(0)
    }

    pub fn active(&self) -> &Profile {
        &self.profiles[self.active_index()]
    }

    pub fn active_mut(&mut self) -> &mut Profile {
        let index = self.active_index();
        &mut self.profiles[index]
    }

    /// The profile a scheduled entry acts on: the named one, or the active
    /// profile when the entry names none.
    pub fn owner_mut(&mut self, id: Option<&str>) -> Option<&mut Profile> {
        match id {
            Some(id) => self.get_mut(id),
            None => Some(self.active_mut()),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.id == id)
    }

    pub fn set_active(&mut self, id: &str) -> Result<&Profile, ProfileError> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        self.active = Some(id.to_string());
        Ok(&self.profiles[index])
    }

    /// Add a profile and make it active.
    pub fn add(&mut self, profile: Profile) -> &Profile {
        self.active = Some(profile.id.clone());
        self.profiles.push(profile);
        &self.profiles[self.profiles.len() - 1]
    }

    /// Remove a profile. The first remaining profile becomes active.
    pub fn delete(&mut self, id: &str) -> Result<Profile, ProfileError> {
        let index = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        if self.profiles.len() <= 1 {
            return Err(ProfileError::LastProfile);
        }
        let removed = self.profiles.remove(index);
        self.active = Some(self.profiles[0].id.clone());
        Ok(removed)
    }
}
