use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(TenantId);
id_newtype!(UserId);
id_newtype!(TeamId);
id_newtype!(CadenceId);
id_newtype!(TimeframeId);
id_newtype!(StatusId);
id_newtype!(ObjectiveId);
id_newtype!(KeyResultId);
id_newtype!(CheckInId);
id_newtype!(TemplateId);
id_newtype!(BadgeId);
id_newtype!(FeedbackId);
id_newtype!(RoomId);
id_newtype!(MessageId);
id_newtype!(AttachmentId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "owner" => Role::Owner,
            "admin" => Role::Admin,
            _ => Role::Member,
        }
    }

    pub fn is_manager(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Percentage,
    Number,
    Currency,
    Boolean,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Percentage => "percentage",
            MetricType::Number => "number",
            MetricType::Currency => "currency",
            MetricType::Boolean => "boolean",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "percentage" => MetricType::Percentage,
            "currency" => MetricType::Currency,
            "boolean" => MetricType::Boolean,
            _ => MetricType::Number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "low" => Confidence::Low,
            "high" => Confidence::High,
            _ => Confidence::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Team,
    Business,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Team, Plan::Business];

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Team => "team",
            Plan::Business => "business",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "team" => Plan::Team,
            "business" => Plan::Business,
            _ => Plan::Free,
        }
    }

    pub fn max_seats(self) -> u32 {
        match self {
            Plan::Free => 5,
            Plan::Team => 50,
            Plan::Business => 500,
        }
    }

    pub fn price_per_seat_cents(self) -> u64 {
        match self {
            Plan::Free => 0,
            Plan::Team => 800,
            Plan::Business => 1500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    Pending,
    Canceled,
}

impl SubscriptionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Pending => "pending",
            SubscriptionState::Canceled => "canceled",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "pending" => SubscriptionState::Pending,
            "canceled" => SubscriptionState::Canceled,
            _ => SubscriptionState::Active,
        }
    }
}
