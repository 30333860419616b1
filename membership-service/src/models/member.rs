//! Member model - association members and their login credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::permission::{self, PermissionSet};

/// Member role codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Member,
    Admin,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberType::Member => "member",
            MemberType::Admin => "admin",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "member" => Some(MemberType::Member),
            "admin" => Some(MemberType::Admin),
            _ => None,
        }
    }

    /// Permissions granted to this role. Admin is a strict superset of member.
    pub fn permissions(&self) -> PermissionSet {
        match self {
            MemberType::Member => PermissionSet::from_iter([permission::MEMBER]),
            MemberType::Admin => PermissionSet::from_iter([permission::MEMBER, permission::ADMIN]),
        }
    }
}

/// Member status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Paused,
    Deleted,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "active",
            MemberStatus::Paused => "paused",
            MemberStatus::Deleted => "deleted",
        }
    }
}

/// Member entity.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Member {
    pub member_uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub member_type_code: String,
    pub member_status_code: String,
    pub subscribed: bool,
    pub language: String,
    pub created_utc: DateTime<Utc>,
}

impl Member {
    pub fn new(
        first_name: String,
        last_name: String,
        email: String,
        member_type: MemberType,
        language: String,
    ) -> Self {
        Self {
            member_uuid: Uuid::new_v4(),
            first_name,
            last_name,
            email,
            member_type_code: member_type.as_str().to_string(),
            member_status_code: MemberStatus::Active.as_str().to_string(),
            subscribed: true,
            language,
            created_utc: Utc::now(),
        }
    }

    /// Unknown type codes fall back to the least privileged role.
    pub fn member_type(&self) -> MemberType {
        MemberType::parse(&self.member_type_code).unwrap_or(MemberType::Member)
    }

    pub fn is_admin(&self) -> bool {
        self.member_type() == MemberType::Admin
    }

    pub fn is_active(&self) -> bool {
        self.member_status_code == MemberStatus::Active.as_str()
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Hashed login credentials, keyed by member.
#[derive(Debug, Clone, FromRow)]
pub struct Credentials {
    pub member_uuid: Uuid,
    pub username: String,
    pub password_hash: String,
    pub updated_utc: DateTime<Utc>,
}

/// Member as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberResponse {
    pub uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(rename = "type")]
    pub member_type: String,
    pub status: String,
    pub subscribed: bool,
    pub language: String,
}

impl From<Member> for MemberResponse {
    fn from(member: Member) -> Self {
        Self {
            uuid: member.member_uuid,
            first_name: member.first_name,
            last_name: member.last_name,
            email: member.email,
            member_type: member.member_type_code,
            status: member.member_status_code,
            subscribed: member.subscribed,
            language: member.language,
        }
    }
}
