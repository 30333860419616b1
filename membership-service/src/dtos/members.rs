use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Copy, Default, Deserialize, ToSchema, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MemberTypeRequest {
    #[default]
    Member,
    Admin,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateMemberRequest {
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    #[schema(example = "Laia")]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    #[schema(example = "Serra")]
    pub last_name: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "laia@example.com")]
    pub email: String,

    #[serde(rename = "type", default)]
    pub member_type: MemberTypeRequest,

    #[validate(length(min = 2, max = 3, message = "Language must be a short code"))]
    #[schema(example = "cat")]
    pub language: Option<String>,
}

/// First administrator of a fresh installation; always created as admin.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InitializeRequest {
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    #[schema(example = "Marta")]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    #[schema(example = "Puig")]
    pub last_name: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "marta@example.com")]
    pub email: String,

    #[validate(length(min = 2, max = 3, message = "Language must be a short code"))]
    pub language: Option<String>,
}

/// Partial update; absent fields are left untouched. Only admins may
/// change `type`.
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateMemberRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 2, max = 3))]
    pub language: Option<String>,

    pub subscribed: Option<bool>,

    #[serde(rename = "type")]
    pub member_type: Option<MemberTypeRequest>,
}
