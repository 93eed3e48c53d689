use crate::dispatcher::Dispatcher;
use crate::error::{RequestError, RequestOutcome};
use crate::transport::HttpTransport;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Caller-supplied value outside the range the service accepts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("min R-squared must be between 0.0 and 1.0, got {0}")]
    RSquaredOutOfRange(f64),
    #[error("poll interval must be a positive number of seconds")]
    ZeroPollInterval,
    #[error("max attempts must be positive")]
    ZeroMaxAttempts,
    #[error("floor area must be positive, got {0}")]
    NonPositiveFloorArea(f64),
    #[error("unknown savings target '{0}' (expected NOMINAL, CONSERVATIVE or AGGRESSIVE)")]
    UnknownSavingsTarget(String),
    #[error("unknown space type '{0}'")]
    UnknownSpaceType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavingsTarget {
    Nominal,
    Conservative,
    Aggressive,
}

impl SavingsTarget {
    pub const ALL: [SavingsTarget; 3] = [
        SavingsTarget::Nominal,
        SavingsTarget::Conservative,
        SavingsTarget::Aggressive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SavingsTarget::Nominal => "NOMINAL",
            SavingsTarget::Conservative => "CONSERVATIVE",
            SavingsTarget::Aggressive => "AGGRESSIVE",
        }
    }
}

impl fmt::Display for SavingsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SavingsTarget {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|target| target.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParameterError::UnknownSavingsTarget(s.to_string()))
    }
}

macro_rules! space_types {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Primary use of a building, as the service names it.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum SpaceType {
            $(#[serde(rename = $name)] $variant,)+
        }

        impl SpaceType {
            pub const ALL: &'static [SpaceType] = &[$(SpaceType::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(SpaceType::$variant => $name,)+
                }
            }
        }
    };
}

space_types! {
    Office => "OFFICE",
    Hotel => "HOTEL",
    K12 => "K12",
    MultifamilyHousing => "MULTIFAMILY_HOUSING",
    WorshipFacility => "WORSHIP_FACILITY",
    Hospital => "HOSPITAL",
    Museum => "MUSEUM",
    BankBranch => "BANK_BRANCH",
    Courthouse => "COURTHOUSE",
    DataCenter => "DATA_CENTER",
    DistributionCenter => "DISTRIBUTION_CENTER",
    FastfoodRestaurant => "FASTFOOD_RESTAURANT",
    FinancialOffice => "FINANCIAL_OFFICE",
    FireStation => "FIRE_STATION",
    NonRefrigeratedWarehouse => "NON_REFRIGERATED_WAREHOUSE",
    PoliceStation => "POLICE_STATION",
    RefrigeratedWarehouse => "REFRIGERATED_WAREHOUSE",
    RetailStore => "RETAIL_STORE",
    SelfStorageFacility => "SELF_STORAGE_FACILITY",
    SeniorCareCommunity => "SENIOR_CARE_COMMUNITY",
    SupermarketGrocery => "SUPERMARKET_GROCERY",
    Restaurant => "RESTAURANT",
    PublicLibrary => "PUBLIC_LIBRARY",
    Other => "OTHER",
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceType {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpaceType::ALL
            .iter()
            .copied()
            .find(|space| space.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParameterError::UnknownSpaceType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FuelType {
    ElectricGrid,
    NaturalGas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergyUnit {
    Kwh,
    Therms,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPortfolio {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBuilding {
    pub portfolio: u64,
    pub name: String,
    pub space_type: SpaceType,
    pub floor_area: f64,
    pub location: String,
    #[serde(default)]
    pub utility_bills: Vec<UtilityBill>,
}

impl NewBuilding {
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.floor_area <= 0.0 || !self.floor_area.is_finite() {
            return Err(ParameterError::NonPositiveFloorArea(self.floor_area));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub portfolio: Option<u64>,
    #[serde(default)]
    pub space_type: Option<String>,
    #[serde(default)]
    pub floor_area: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
}

/// One month (or other period) of metered consumption for a single fuel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityBill {
    pub fuel_type: FuelType,
    pub bill_start_date: NaiveDate,
    pub bill_end_date: NaiveDate,
    pub consumption: f64,
    pub unit: EnergyUnit,
    pub cost: f64,
}

/// A bill as stored by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBill {
    pub id: u64,
    #[serde(flatten)]
    pub bill: UtilityBill,
}

/// Partial bill update for PATCH; unset fields are left alone server side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<FuelType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumption: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<EnergyUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl BillUpdate {
    pub fn is_empty(&self) -> bool {
        *self == BillUpdate::default()
    }
}

/// Validated inputs for an analytics run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisParams {
    savings_target: SavingsTarget,
    min_r_squared: f64,
}

impl AnalysisParams {
    pub fn new(savings_target: SavingsTarget, min_r_squared: f64) -> Result<Self, ParameterError> {
        if !(0.0..=1.0).contains(&min_r_squared) {
            return Err(ParameterError::RSquaredOutOfRange(min_r_squared));
        }
        Ok(Self {
            savings_target,
            min_r_squared,
        })
    }

    pub fn savings_target(&self) -> SavingsTarget {
        self.savings_target
    }

    pub fn min_r_squared(&self) -> f64 {
        self.min_r_squared
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BenchmarkDataType {
    Default,
}

/// Body of `POST buildings/{id}/analytics/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRequest {
    pub savings_target: SavingsTarget,
    pub min_model_r_squared: f64,
    pub benchmark_data_type: BenchmarkDataType,
}

impl From<&AnalysisParams> for AnalyticsRequest {
    fn from(params: &AnalysisParams) -> Self {
        Self {
            savings_target: params.savings_target,
            min_model_r_squared: params.min_r_squared,
            benchmark_data_type: BenchmarkDataType::Default,
        }
    }
}

/// Identifies one analytics job for its whole lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub building_id: u64,
    pub analytics_id: String,
}

impl JobHandle {
    pub fn new(building_id: u64, analytics_id: impl Into<String>) -> Self {
        Self {
            building_id,
            analytics_id: analytics_id.into(),
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "building {} / analytics {}", self.building_id, self.analytics_id)
    }
}

/// Unit system for rendered analytics documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    Si,
    Ip,
}

/// Typed access to the analytics service's resources.
pub struct ApiClient<T: HttpTransport> {
    dispatcher: Dispatcher<T>,
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(dispatcher: Dispatcher<T>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub async fn create_portfolio(&self, name: &str) -> Result<Portfolio, RequestError> {
        let payload = to_body(&NewPortfolio {
            name: name.to_string(),
        })?;
        let body = self
            .dispatcher
            .dispatch("POST", "/portfolios/", Some(&payload), &[])
            .await?;
        decode(body)
    }

    pub async fn create_building(&self, building: &NewBuilding) -> Result<Building, RequestError> {
        let payload = to_body(building)?;
        let body = self
            .dispatcher
            .dispatch("POST", "/buildings/", Some(&payload), &[])
            .await?;
        decode(body)
    }

    pub async fn list_utility_bills(
        &self,
        building_id: u64,
    ) -> Result<Vec<StoredBill>, RequestError> {
        let path = format!("/buildings/{}/utility_bills/", building_id);
        let body = self.dispatcher.dispatch("GET", &path, None, &[]).await?;
        decode(body)
    }

    pub async fn get_utility_bill(
        &self,
        building_id: u64,
        bill_id: u64,
    ) -> Result<StoredBill, RequestError> {
        let path = format!("/buildings/{}/utility_bills/{}/", building_id, bill_id);
        let body = self.dispatcher.dispatch("GET", &path, None, &[]).await?;
        decode(body)
    }

    /// Upload additional bills; the service's acknowledgement is returned as-is.
    pub async fn add_utility_bills(
        &self,
        building_id: u64,
        bills: &[UtilityBill],
    ) -> RequestOutcome {
        let payload = to_body(bills)?;
        let path = format!("/buildings/{}/utility_bills/", building_id);
        self.dispatcher.dispatch("POST", &path, Some(&payload), &[]).await
    }

    pub async fn edit_utility_bill(
        &self,
        building_id: u64,
        bill_id: u64,
        update: &BillUpdate,
    ) -> Result<StoredBill, RequestError> {
        let payload = to_body(update)?;
        let path = format!("/buildings/{}/utility_bills/{}/", building_id, bill_id);
        let body = self
            .dispatcher
            .dispatch("PATCH", &path, Some(&payload), &[])
            .await?;
        decode(body)
    }

    pub async fn delete_utility_bill(
        &self,
        building_id: u64,
        bill_id: u64,
    ) -> Result<(), RequestError> {
        let path = format!("/buildings/{}/utility_bills/{}/", building_id, bill_id);
        self.dispatcher.dispatch("DELETE", &path, None, &[]).await?;
        Ok(())
    }

    /// Trigger an analytics run. The raw outcome is returned because the
    /// poller needs to look at the job id and initial status itself.
    pub async fn run_building_analysis(
        &self,
        building_id: u64,
        params: &AnalysisParams,
    ) -> RequestOutcome {
        let payload = to_body(&AnalyticsRequest::from(params))?;
        let path = format!("/buildings/{}/analytics/", building_id);
        self.dispatcher.dispatch("POST", &path, Some(&payload), &[]).await
    }

    pub async fn get_building_analysis(&self, handle: &JobHandle) -> RequestOutcome {
        self.dispatcher.dispatch("GET", &analytics_path(handle), None, &[]).await
    }

    /// Fetch the rendered HTML report for a finished job.
    pub async fn get_analysis_document(
        &self,
        handle: &JobHandle,
        units: Units,
    ) -> Result<String, RequestError> {
        let mut query = vec![("format", "html")];
        if units == Units::Ip {
            query.push(("units", "IP"));
        }
        self.dispatcher
            .dispatch_raw("GET", &analytics_path(handle), &query)
            .await
    }
}

fn analytics_path(handle: &JobHandle) -> String {
    format!(
        "/buildings/{}/analytics/{}/",
        handle.building_id, handle.analytics_id
    )
}

fn to_body<S: Serialize + ?Sized>(value: &S) -> Result<Value, RequestError> {
    serde_json::to_value(value).map_err(|e| RequestError::decode(e.to_string(), String::new()))
}

fn decode<R: DeserializeOwned>(body: Option<Value>) -> Result<R, RequestError> {
    let body = body.ok_or_else(|| RequestError::decode("empty response body", String::new()))?;
    let raw = body.to_string();
    serde_json::from_value(body).map_err(|e| RequestError::decode(e.to_string(), raw))
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
