//! Core deal record and the value types it is built from
use super::error::ValidationError;
use super::witness::Witness;
use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Position of a deal in the workflow state machine.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum Stage {
    #[n(0)]
    Created,
    #[n(1)]
    PendingApproval,
    #[n(2)]
    Rejected,
    #[n(3)]
    AwaitingClientAccountCreation,
    #[n(4)]
    AwaitingSalesmanReport,
    #[n(5)]
    AwaitingReviewsAndCredentials,
    #[n(6)]
    Completed,
    #[n(7)]
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Created,
        Stage::PendingApproval,
        Stage::Rejected,
        Stage::AwaitingClientAccountCreation,
        Stage::AwaitingSalesmanReport,
        Stage::AwaitingReviewsAndCredentials,
        Stage::Completed,
        Stage::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Rejected | Stage::Completed | Stage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Created => "Created",
            Stage::PendingApproval => "PendingApproval",
            Stage::Rejected => "Rejected",
            Stage::AwaitingClientAccountCreation => "AwaitingClientAccountCreation",
            Stage::AwaitingSalesmanReport => "AwaitingSalesmanReport",
            Stage::AwaitingReviewsAndCredentials => "AwaitingReviewsAndCredentials",
            Stage::Completed => "Completed",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one place status strings from outside the engine are normalised.
///
/// Matching ignores case, `_`, `-` and spaces, so `pending_approval`,
/// `PENDING-APPROVAL` and `PendingApproval` are the same stage. The retired
/// manager approval status folds into [`Stage::PendingApproval`].
impl FromStr for Stage {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let stage = match key.as_str() {
            "created" | "draft" => Stage::Created,
            "pendingapproval" | "pendingmanagerapproval" | "pendingsuperadminapproval" => {
                Stage::PendingApproval
            }
            "rejected" => Stage::Rejected,
            "awaitingclientaccountcreation" => Stage::AwaitingClientAccountCreation,
            "awaitingsalesmanreport" => Stage::AwaitingSalesmanReport,
            "awaitingreviewsandcredentials" => Stage::AwaitingReviewsAndCredentials,
            "completed" => Stage::Completed,
            "failed" => Stage::Failed,
            _ => return Err(ValidationError::UnknownStage(s.to_owned())),
        };
        Ok(stage)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
}

/// Which of the two peer review slots a submission fills.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewSlot {
    #[n(0)]
    First,
    #[n(1)]
    Second,
}

impl fmt::Display for ReviewSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewSlot::First => f.write_str("first"),
            ReviewSlot::Second => f.write_str("second"),
        }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                _: &mut C,
            ) -> Result<(), minicbor::encode::Error<W::Error>> {
                e.str(&self.0)?.ok()
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _: &mut C,
            ) -> Result<Self, minicbor::decode::Error> {
                Ok(Self(d.str()?.to_owned()))
            }
        }
    };
}

string_id!(
    /// Stable identifier of a deal, a bech32 `deal_` string over a UUIDv7.
    DealId
);
string_id!(
    /// Identifier of a human actor as known to the identity provider.
    ActorId
);

impl DealId {
    pub fn generate() -> anyhow::Result<Self> {
        Ok(Self(super::utils::new_uuid_to_bech32("deal_")?))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Into::into)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Whether the instant fits the nanosecond encoding (roughly 1677 to 2262).
    pub fn is_encodable(&self) -> bool {
        self.0.timestamp_nanos_opt().is_some()
    }
}

// ordered by instant; `Utc` has no `Ord` of its own
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Commercial content of a deal. Immutable once the deal exists.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DealDetails {
    #[n(0)]
    pub client_id: String,
    #[n(1)]
    pub client_name: String,
    #[n(2)]
    pub deal_value: u64, // minor currency units, always > 0
    #[n(3)]
    pub description: String,
    #[n(4)]
    pub expected_close_date: TimeStamp<Utc>,
}

/// Who is expected to do the salesman and peer review work on a deal.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    #[n(0)]
    pub salesman_id: ActorId,
    #[n(1)]
    pub first_reviewer_id: ActorId,
    #[n(2)]
    pub second_reviewer_id: Option<ActorId>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    #[n(0)]
    pub approver_id: ActorId,
    #[n(1)]
    pub decision: Decision,
    #[n(2)]
    pub notes: String,
    #[n(3)]
    pub decided_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SalesmanReport {
    #[n(0)]
    pub text: String,
    #[n(1)]
    pub attachments: Vec<String>, // references handed out by the upload service
    #[n(2)]
    pub submitted_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PeerReview {
    #[n(0)]
    pub reviewer_id: ActorId,
    #[n(1)]
    pub text: String,
    #[n(2)]
    pub submitted_at: TimeStamp<Utc>,
}

/// Client login issued to the customer. The password never lands here.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    #[n(0)]
    pub username: String,
    #[n(1)]
    pub set_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AbortRecord {
    #[n(0)]
    pub aborted_by: ActorId,
    #[n(1)]
    pub reason: String,
    #[n(2)]
    pub aborted_at: TimeStamp<Utc>,
}

/// The aggregate root. Only the workflow engine writes these.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Deal {
    #[n(0)]
    pub id: DealId,
    #[n(1)]
    pub version: u64,
    #[n(2)]
    pub stage: Stage,
    #[n(3)]
    pub details: DealDetails,
    #[n(4)]
    pub assignment: Assignment,
    #[n(5)]
    pub created_by: ActorId,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub approval: Option<ApprovalRecord>,
    #[n(8)]
    pub client_account_created_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub salesman_report: Option<SalesmanReport>,
    #[n(10)]
    pub first_review: Option<PeerReview>,
    #[n(11)]
    pub second_review: Option<PeerReview>,
    #[n(12)]
    pub client_credentials: Option<ClientCredentials>,
    #[n(13)]
    pub abort: Option<AbortRecord>,
    #[n(14)]
    pub history: Vec<Witness>,
}

impl Deal {
    /// A fresh record in [`Stage::Created`] at version 0.
    pub fn new(
        id: DealId,
        details: DealDetails,
        assignment: Assignment,
        created_by: ActorId,
        created_at: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            version: 0,
            stage: Stage::Created,
            details,
            assignment,
            created_by,
            created_at,
            approval: None,
            client_account_created_at: None,
            salesman_report: None,
            first_review: None,
            second_review: None,
            client_credentials: None,
            abort: None,
            history: vec![],
        }
    }

    pub fn review(&self, slot: ReviewSlot) -> Option<&PeerReview> {
        match slot {
            ReviewSlot::First => self.first_review.as_ref(),
            ReviewSlot::Second => self.second_review.as_ref(),
        }
    }

    pub fn reviewer_for(&self, slot: ReviewSlot) -> Option<&ActorId> {
        match slot {
            ReviewSlot::First => Some(&self.assignment.first_reviewer_id),
            ReviewSlot::Second => self.assignment.second_reviewer_id.as_ref(),
        }
    }

    /// True once every converging sub-task of the final stage is done: the
    /// first review, the second review when a second reviewer is assigned, and
    /// the client credentials.
    pub fn reviews_and_credentials_complete(&self) -> bool {
        let second_done =
            self.assignment.second_reviewer_id.is_none() || self.second_review.is_some();
        self.first_review.is_some() && second_done && self.client_credentials.is_some()
    }

    /// Latest timestamp recorded anywhere on the deal.
    pub fn latest_timestamp(&self) -> &TimeStamp<Utc> {
        self.history
            .last()
            .map(|w| &w.timestamp_utc)
            .unwrap_or(&self.created_at)
    }
}

/// Draft used to construct a deal, filled builder style and validated once.
#[derive(Debug, Default, Clone)]
pub struct DealDraft {
    client_id: Option<String>,
    client_name: Option<String>,
    deal_value: u64,
    description: String,
    expected_close_date: Option<TimeStamp<Utc>>,
    salesman_id: Option<ActorId>,
    first_reviewer_id: Option<ActorId>,
    second_reviewer_id: Option<ActorId>,
}

impl DealDraft {
    /// Construct a new builder object, this becomes the basis for a deal
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_client(mut self, client_id: &str, client_name: &str) -> Self {
        self.client_id = Some(client_id.to_owned());
        self.client_name = Some(client_name.to_owned());
        self
    }
    pub fn set_deal_value(mut self, value: u64) -> Self {
        self.deal_value = value;
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }
    pub fn set_expected_close_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.expected_close_date = Some(date);
        self
    }
    pub fn set_salesman(mut self, salesman: ActorId) -> Self {
        self.salesman_id = Some(salesman);
        self
    }
    pub fn set_first_reviewer(mut self, reviewer: ActorId) -> Self {
        self.first_reviewer_id = Some(reviewer);
        self
    }
    pub fn set_second_reviewer(mut self, reviewer: ActorId) -> Self {
        self.second_reviewer_id = Some(reviewer);
        self
    }

    /// Checks every field and splits the draft into the parts stored on the deal.
    pub fn validate_and_finalise(self) -> Result<(DealDetails, Assignment), ValidationError> {
        let client_id = non_blank(self.client_id, "client_id")?;
        let client_name = non_blank(self.client_name, "client_name")?;
        if self.deal_value == 0 {
            return Err(ValidationError::NonPositiveValue);
        }
        let expected_close_date = self
            .expected_close_date
            .ok_or(ValidationError::MissingField("expected_close_date"))?;
        if !expected_close_date.is_encodable() {
            return Err(ValidationError::DateOutOfRange("expected_close_date"));
        }
        let salesman_id = self
            .salesman_id
            .ok_or(ValidationError::MissingField("salesman_id"))?;
        let first_reviewer_id = self
            .first_reviewer_id
            .ok_or(ValidationError::MissingField("first_reviewer_id"))?;

        // peer review means someone other than the salesman, and two different peers
        if first_reviewer_id == salesman_id
            || self.second_reviewer_id.as_ref() == Some(&salesman_id)
        {
            return Err(ValidationError::ReviewerIsSalesman);
        }
        if self.second_reviewer_id.as_ref() == Some(&first_reviewer_id) {
            return Err(ValidationError::DuplicateReviewer);
        }

        Ok((
            DealDetails {
                client_id,
                client_name,
                deal_value: self.deal_value,
                description: self.description,
                expected_close_date,
            },
            Assignment {
                salesman_id,
                first_reviewer_id,
                second_reviewer_id: self.second_reviewer_id,
            },
        ))
    }
}

fn non_blank(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field)),
    }
}
