// Entity model - plain data for users, posts, comments, the network graph and preferences

pub mod network;
pub mod patch;
pub mod post;
pub mod preferences;
pub mod requests;
pub mod user;

pub use network::{NetworkEdge, NetworkGraph, NetworkNode, RemovedNode};
pub use post::{Comment, CommentAuthor, CommentPatch, Post, PostChanges, PostPatch};
pub use preferences::{Preferences, PreferencesPatch, ProfileVisibility, Theme};
pub use requests::{
    AcceptConnectionRequest, CommentUpdateRequest, ConnectionRequest, NetworkDataUpdateRequest,
    NewCommentRequest, NewPostRequest, PostUpdateRequest, UserUpdateRequest,
};
pub use user::{ConnectionStatus, User, UserConnection, UserPatch};

/// Preference updates carry exactly the patch shape
pub type PreferencesUpdateRequest = PreferencesPatch;
