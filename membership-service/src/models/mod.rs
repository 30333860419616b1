pub mod event;
pub mod member;
pub mod notification;
pub mod permission;

pub use event::{Event, EventResponse, Participation};
pub use member::{Credentials, Member, MemberResponse, MemberStatus, MemberType};
pub use notification::{DeliveryStatus, NewNotification, Notification, NotificationType};
pub use permission::PermissionSet;
