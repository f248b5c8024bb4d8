mod client;
mod oauth;

pub use client::{
    ApiErrorClass, ChildQuery, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE, FileMetadata,
    ROOT_ID,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
