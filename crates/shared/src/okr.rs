use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    BadgeId, CadenceId, CheckInId, Confidence, FeedbackId, KeyResultId, MetricType, ObjectiveId,
    StatusId, TeamId, TemplateId, TimeframeId, UserId,
};

/// Tri-state field for PATCH bodies: absent keeps the value, `null` clears
/// it, anything else replaces it.
fn patch_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team_id: TeamId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTeamRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceSummary {
    pub cadence_id: CadenceId,
    pub name: String,
    pub period_months: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCadenceRequest {
    pub name: String,
    pub period_months: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateTimeframesRequest {
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSummary {
    pub timeframe_id: TimeframeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence_id: Option<CadenceId>,
    pub name: String,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTimeframeRequest {
    pub name: String,
    #[serde(default)]
    pub cadence_id: Option<CadenceId>,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTimeframeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_on: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status_id: StatusId,
    pub name: String,
    pub color: String,
    pub position: u32,
    pub is_done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStatusRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_done: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_done: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderStatusesRequest {
    pub status_ids: Vec<StatusId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSummary {
    pub objective_id: ObjectiveId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_id: Option<TimeframeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ObjectiveId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<StatusId>,
    pub position: u32,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveDetail {
    #[serde(flatten)]
    pub objective: ObjectiveSummary,
    pub key_results: Vec<KeyResultSummary>,
    pub child_ids: Vec<ObjectiveId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectiveFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateObjectiveRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub timeframe_id: Option<TimeframeId>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
    #[serde(default)]
    pub parent_id: Option<ObjectiveId>,
    #[serde(default)]
    pub status_id: Option<StatusId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateObjectiveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub team_id: Option<Option<TeamId>>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeframe_id: Option<Option<TimeframeId>>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<Option<UserId>>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<Option<ObjectiveId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveObjectiveRequest {
    pub status_id: StatusId,
    pub position: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveNode {
    pub objective: ObjectiveSummary,
    pub children: Vec<ObjectiveNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardColumn {
    pub status: StatusSummary,
    pub objectives: Vec<ObjectiveSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    pub columns: Vec<BoardColumn>,
    pub unassigned: Vec<ObjectiveSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeframeQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyResultSummary {
    pub key_result_id: KeyResultId,
    pub objective_id: ObjectiveId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    pub title: String,
    pub metric_type: MetricType,
    pub start_value: f64,
    pub target_value: f64,
    pub current_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub weight: f64,
    pub position: u32,
    pub progress: f64,
    pub updated_at: DateTime<Utc>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyResultRequest {
    pub title: String,
    pub metric_type: MetricType,
    #[serde(default)]
    pub start_value: f64,
    pub target_value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateKeyResultRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub unit: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "patch_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<Option<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInSummary {
    pub check_in_id: CheckInId,
    pub objective_id: ObjectiveId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_result_id: Option<KeyResultId>,
    pub author_id: UserId,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<f64>,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResultCheckInRequest {
    pub value: f64,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectiveCheckInRequest {
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyResultTemplate {
    pub title: String,
    pub metric_type: MetricType,
    pub target_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub template_id: TemplateId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub objective_title: String,
    pub key_results: Vec<KeyResultTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub objective_title: String,
    #[serde(default)]
    pub key_results: Vec<KeyResultTemplate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyTemplateRequest {
    #[serde(default)]
    pub timeframe_id: Option<TimeframeId>,
    #[serde(default)]
    pub team_id: Option<TeamId>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeSummary {
    pub badge_id: BadgeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBadgeRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub feedback_id: FeedbackId,
    pub from_user_id: UserId,
    pub from_name: String,
    pub to_user_id: UserId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<BadgeSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<ObjectiveId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiveFeedbackRequest {
    pub to_user_id: UserId,
    pub message: String,
    #[serde(default)]
    pub badge_id: Option<BadgeId>,
    #[serde(default)]
    pub objective_id: Option<ObjectiveId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status_id: StatusId,
    pub name: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamProgress {
    pub team_id: TeamId,
    pub name: String,
    pub objective_count: u32,
    pub average_progress: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_id: Option<TimeframeId>,
    pub total_objectives: u32,
    pub completed_objectives: u32,
    pub average_progress: f64,
    pub by_status: Vec<StatusCount>,
    pub by_team: Vec<TeamProgress>,
    pub check_ins_last_7_days: u32,
    pub recent_check_ins: Vec<CheckInSummary>,
}
