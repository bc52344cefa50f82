use uuid::Uuid;

use crate::{Error, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

impl NewUser {
    pub fn new(id: UserId, name: String, avatar: Option<String>) -> NewUser {
        NewUser { id, name, avatar }
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_name(&self.name)?;
        if let Some(avatar) = &self.avatar {
            crate::validate_string(avatar)?;
        }
        Ok(())
    }
}
