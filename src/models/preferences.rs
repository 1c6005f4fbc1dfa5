use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileVisibility {
    #[default]
    Public,
    Contacts,
    Private,
}

/// Per-user UI and notification preferences (singleton per user)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub reduce_motion: bool,
    #[serde(default)]
    pub high_contrast: bool,
    #[serde(default = "enabled")]
    pub email_notifications: bool,
    #[serde(default = "enabled")]
    pub push_notifications: bool,
    #[serde(default)]
    pub profile_visibility: ProfileVisibility,
}

fn enabled() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            reduce_motion: false,
            high_contrast: false,
            email_notifications: true,
            push_notifications: true,
            profile_visibility: ProfileVisibility::Public,
        }
    }
}

/// Partial preference change; also the request type for preference updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferencesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_motion: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_contrast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_visibility: Option<ProfileVisibility>,
}

impl PreferencesPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<Preferences> for PreferencesPatch {
    fn from(prefs: Preferences) -> Self {
        Self {
            theme: Some(prefs.theme),
            reduce_motion: Some(prefs.reduce_motion),
            high_contrast: Some(prefs.high_contrast),
            email_notifications: Some(prefs.email_notifications),
            push_notifications: Some(prefs.push_notifications),
            profile_visibility: Some(prefs.profile_visibility),
        }
    }
}

impl Preferences {
    pub fn apply_patch(&mut self, patch: &PreferencesPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(reduce_motion) = patch.reduce_motion {
            self.reduce_motion = reduce_motion;
        }
        if let Some(high_contrast) = patch.high_contrast {
            self.high_contrast = high_contrast;
        }
        if let Some(email) = patch.email_notifications {
            self.email_notifications = email;
        }
        if let Some(push) = patch.push_notifications {
            self.push_notifications = push;
        }
        if let Some(visibility) = patch.profile_visibility {
            self.profile_visibility = visibility;
        }
    }
}
