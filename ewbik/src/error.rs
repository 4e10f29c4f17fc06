use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown bone: {index}")]
    UnknownBone { index: u32 },

    #[error("unknown transform node: {index}")]
    UnknownNode { index: u32 },

    #[error("transform node {index} cannot be parented to itself")]
    NodeCycle { index: u32 },

    #[error("the root bone of a skeleton cannot be removed")]
    RootRemoval,

    #[error("bone '{bone}' has no pin")]
    NoPin { bone: String },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[cfg(feature = "json")]
    #[error("failed to parse rig JSON: {message}")]
    JsonParse { message: String },

    #[cfg(feature = "json")]
    #[error("unknown parent bone '{parent}' for bone '{bone}'")]
    JsonUnknownParent { bone: String, parent: String },

    #[cfg(feature = "json")]
    #[error("duplicate bone name '{bone}'")]
    JsonDuplicateBone { bone: String },

    #[cfg(feature = "json")]
    #[error("rig JSON must declare exactly one root bone, found {count}")]
    JsonRootCount { count: usize },
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}
