// Stored-procedure parameter shapes, shared by callers and the in-memory backend

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppResult;
use crate::models::{
    AcceptConnectionRequest, CommentUpdateRequest, ConnectionRequest, NetworkDataUpdateRequest,
    NetworkEdge, NetworkNode, NewCommentRequest, NewPostRequest, PostUpdateRequest,
    PreferencesPatch, ProfileVisibility, Theme, UserUpdateRequest,
};

pub fn encode<T: Serialize>(params: &T) -> AppResult<Value> {
    Ok(serde_json::to_value(params)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetUserParams {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetPostParams {
    pub post_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateUserParams {
    pub p_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_subtitle: Option<String>,
}

impl From<&UserUpdateRequest> for UpdateUserParams {
    fn from(request: &UserUpdateRequest) -> Self {
        Self {
            p_user_id: request.user_id.clone(),
            p_name: request.name.clone(),
            p_email: request.email.clone(),
            p_avatar: request.avatar.clone(),
            p_bio: request.bio.clone(),
            p_subtitle: request.subtitle.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPostParams {
    pub p_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
}

impl From<&NewPostRequest> for AddPostParams {
    fn from(request: &NewPostRequest) -> Self {
        Self {
            p_content: request.content.clone(),
            p_weight: request.weight,
            p_tags: request.tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePostParams {
    pub p_post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<Vec<String>>,
}

impl From<&PostUpdateRequest> for UpdatePostParams {
    fn from(request: &PostUpdateRequest) -> Self {
        Self {
            p_post_id: request.post_id.clone(),
            p_content: request.content.clone(),
            p_weight: request.weight,
            p_tags: request.tags.clone(),
        }
    }
}

/// `remove_post` and `like_post`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRefParams {
    pub p_post_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddCommentParams {
    pub p_post_id: String,
    pub p_content: String,
}

impl From<&NewCommentRequest> for AddCommentParams {
    fn from(request: &NewCommentRequest) -> Self {
        Self {
            p_post_id: request.post_id.clone(),
            p_content: request.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommentParams {
    pub p_comment_id: String,
    pub p_content: String,
}

impl From<&CommentUpdateRequest> for UpdateCommentParams {
    fn from(request: &CommentUpdateRequest) -> Self {
        Self {
            p_comment_id: request.comment_id.clone(),
            p_content: request.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRefParams {
    pub p_comment_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateNetworkDataParams {
    pub p_nodes: Vec<NetworkNode>,
    pub p_edges: Vec<NetworkEdge>,
}

impl From<&NetworkDataUpdateRequest> for UpdateNetworkDataParams {
    fn from(request: &NetworkDataUpdateRequest) -> Self {
        Self {
            p_nodes: request.nodes.clone(),
            p_edges: request.edges.clone(),
        }
    }
}

/// `get_user_preferences`; no user id means the signed-in user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetPreferencesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePreferencesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_reduce_motion: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_high_contrast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_email_notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_push_notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_profile_visibility: Option<ProfileVisibility>,
}

impl From<&PreferencesPatch> for UpdatePreferencesParams {
    fn from(patch: &PreferencesPatch) -> Self {
        Self {
            p_theme: patch.theme,
            p_reduce_motion: patch.reduce_motion,
            p_high_contrast: patch.high_contrast,
            p_email_notifications: patch.email_notifications,
            p_push_notifications: patch.push_notifications,
            p_profile_visibility: patch.profile_visibility,
        }
    }
}

impl From<&UpdatePreferencesParams> for PreferencesPatch {
    fn from(params: &UpdatePreferencesParams) -> Self {
        Self {
            theme: params.p_theme,
            reduce_motion: params.p_reduce_motion,
            high_contrast: params.p_high_contrast,
            email_notifications: params.p_email_notifications,
            push_notifications: params.p_push_notifications,
            profile_visibility: params.p_profile_visibility,
        }
    }
}

/// `add_connection` and `remove_connection`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedUserParams {
    pub p_connected_user_id: String,
}

impl From<&ConnectionRequest> for ConnectedUserParams {
    fn from(request: &ConnectionRequest) -> Self {
        Self {
            p_connected_user_id: request.connected_user_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptConnectionParams {
    pub p_user_id: String,
}

impl From<&AcceptConnectionRequest> for AcceptConnectionParams {
    fn from(request: &AcceptConnectionRequest) -> Self {
        Self {
            p_user_id: request.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_fields_are_omitted() {
        let request = PostUpdateRequest::new("p1").weight(15.0);
        let params = encode(&UpdatePostParams::from(&request)).unwrap();
        assert_eq!(params, json!({"p_post_id": "p1", "p_weight": 15.0}));
    }

    #[test]
    fn test_preferences_params_use_wire_enums() {
        let patch = PreferencesPatch {
            theme: Some(Theme::Dark),
            profile_visibility: Some(ProfileVisibility::Contacts),
            ..PreferencesPatch::default()
        };
        let params = encode(&UpdatePreferencesParams::from(&patch)).unwrap();
        assert_eq!(
            params,
            json!({"p_theme": "dark", "p_profile_visibility": "contacts"})
        );
    }
}
