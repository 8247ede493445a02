//! Domain entities shared across the service
//!
//! Storage keeps identifiers as UUID text and timestamps as RFC 3339 text;
//! these are the in-memory shapes the services and routes trade in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User role, ordered super_admin > admin > operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Operator => "operator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Self::SuperAdmin),
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }

    /// Rank in the role lattice; higher outranks lower
    pub fn rank(&self) -> u8 {
        match self {
            Self::SuperAdmin => 3,
            Self::Admin => 2,
            Self::Operator => 1,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account
///
/// `password_hash` and `password_history` never leave the identity layer;
/// anything user-facing goes through [`UserView`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    pub must_change_password: bool,
    /// Prior digests, oldest first, bounded by the history policy
    pub password_history: Vec<String>,
    pub failed_login_count: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Public projection, safe for JSON responses
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id,
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            is_active: self.is_active,
            must_change_password: self.must_change_password,
        }
    }

    /// Whether a lockout is active at `now`
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// User projection without credential material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub is_active: bool,
    pub must_change_password: bool,
}

/// An authenticated browser session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Opaque high-entropy token; never logged
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session whose expiry equals `now` is already expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A package recipient from the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: Uuid,
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Package lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Registered,
    AwaitingPickup,
    OutForDelivery,
    Delivered,
    Returned,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::AwaitingPickup => "awaiting_pickup",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(Self::Registered),
            "awaiting_pickup" => Some(Self::AwaitingPickup),
            "out_for_delivery" => Some(Self::OutForDelivery),
            "delivered" => Some(Self::Delivered),
            "returned" => Some(Self::Returned),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Returned)
    }

    /// Status transition policy
    pub fn can_transition_to(&self, next: PackageStatus) -> bool {
        use PackageStatus::*;
        matches!(
            (self, next),
            (Registered, AwaitingPickup)
                | (Registered, OutForDelivery)
                | (Registered, Returned)
                | (AwaitingPickup, OutForDelivery)
                | (AwaitingPickup, Delivered)
                | (AwaitingPickup, Returned)
                | (OutForDelivery, Delivered)
                | (OutForDelivery, Returned)
        )
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub tracking_no: String,
    pub carrier: String,
    pub recipient_id: Uuid,
    pub status: PackageStatus,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a package's immutable event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageEvent {
    pub id: Uuid,
    pub package_id: Uuid,
    /// None only for the registration event
    pub old_status: Option<PackageStatus>,
    pub new_status: PackageStatus,
    pub notes: Option<String>,
    pub actor_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A stored package photo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub package_id: Uuid,
    pub original_filename: String,
    pub stored_path: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A process-wide setting row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::SuperAdmin, Role::Admin, Role::Operator] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_role_lattice_order() {
        assert!(Role::SuperAdmin.rank() > Role::Admin.rank());
        assert!(Role::Admin.rank() > Role::Operator.rank());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            PackageStatus::Registered,
            PackageStatus::AwaitingPickup,
            PackageStatus::OutForDelivery,
            PackageStatus::Delivered,
            PackageStatus::Returned,
        ] {
            assert_eq!(PackageStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        use PackageStatus::*;
        for terminal in [Delivered, Returned] {
            for next in [Registered, AwaitingPickup, OutForDelivery, Delivered, Returned] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_registered_transitions() {
        use PackageStatus::*;
        assert!(Registered.can_transition_to(AwaitingPickup));
        assert!(Registered.can_transition_to(OutForDelivery));
        assert!(Registered.can_transition_to(Returned));
        assert!(!Registered.can_transition_to(Delivered));
        assert!(!Registered.can_transition_to(Registered));
    }

    #[test]
    fn test_awaiting_pickup_transitions() {
        use PackageStatus::*;
        assert!(AwaitingPickup.can_transition_to(OutForDelivery));
        assert!(AwaitingPickup.can_transition_to(Delivered));
        assert!(AwaitingPickup.can_transition_to(Returned));
        assert!(!AwaitingPickup.can_transition_to(Registered));
    }

    #[test]
    fn test_session_expiry_boundary() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token: "t".into(),
            expires_at: now,
            last_activity: now,
            client_ip: None,
            user_agent: None,
            created_at: now,
        };
        // expires_at == now counts as expired
        assert!(session.is_expired(now));
    }

    #[test]
    fn test_user_view_hides_credentials() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "jdoe".into(),
            password_hash: "$argon2id$...".into(),
            full_name: "Jane Doe".into(),
            role: Role::Operator,
            is_active: true,
            must_change_password: false,
            password_history: vec!["$argon2id$old".into()],
            failed_login_count: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user.view()).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(json.contains("jdoe"));
    }
}
