//! Concrete pipelines and their source-specific steps

pub mod financials;
pub mod index_daily_close;
pub mod stock_company_details;
pub mod stock_daily_prices;

pub use financials::FinancialsPipeline;
pub use index_daily_close::IndexDailyClosePipeline;
pub use stock_company_details::StockCompanyDetailsPipeline;
pub use stock_daily_prices::StockDailyPricesPipeline;

use crate::clients::storage::SqlValue;
use crate::core::error::StepError;
use chrono::{Local, NaiveDate};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date assumed for a series that was never stored
pub(crate) fn never_updated() -> NaiveDate {
    NaiveDate::from_ymd_opt(1600, 1, 1).unwrap_or_default()
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// `updated_at` stamp written with every extracted row
pub(crate) fn updated_at() -> String {
    Local::now().format(DATETIME_FORMAT).to_string()
}

/// Leading `YYYY-MM-DD` of a stored date or datetime
pub(crate) fn parse_date(value: &SqlValue) -> Option<NaiveDate> {
    let text = value.as_str()?;
    NaiveDate::parse_from_str(text.get(..10)?, DATE_FORMAT).ok()
}

pub(crate) fn missing_endpoint(api: &str, endpoint: &str) -> StepError {
    StepError::InvalidData(format!("No {api} endpoint '{endpoint}' configured"))
}
