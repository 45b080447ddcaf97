//! Catalog of the data operations routed through the governor.
//!
//! Each variant carries typed, validated parameters with the provider's
//! defaults applied, so that two requests that differ only in whether a
//! default was spelled out produce the same [`RequestKey`].

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::OperationError;
use crate::key::{normalize_symbol, RequestKey};

/// Accepted `period` values for historical prices.
pub const VALID_PERIODS: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];

/// Accepted `interval` values for historical prices.
pub const VALID_INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

const DEFAULT_PERIOD: &str = "1mo";
const DEFAULT_INTERVAL: &str = "1d";
const DEFAULT_MONTHS_BACK: u32 = 12;
const EXPIRATION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Declares a closed set of snake_case choices with parsing and display.
macro_rules! choice_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every accepted value.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = OperationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(OperationError::InvalidChoice {
                        parameter: $label,
                        value: other.to_string(),
                        allowed: Self::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    }),
                }
            }
        }
    };
}

choice_enum! {
    /// Financial statement kinds.
    FinancialType, "financial type" {
        IncomeStmt => "income_stmt",
        QuarterlyIncomeStmt => "quarterly_income_stmt",
        BalanceSheet => "balance_sheet",
        QuarterlyBalanceSheet => "quarterly_balance_sheet",
        Cashflow => "cashflow",
        QuarterlyCashflow => "quarterly_cashflow",
    }
}

choice_enum! {
    /// Holder information kinds.
    HolderType, "holder type" {
        MajorHolders => "major_holders",
        InstitutionalHolders => "institutional_holders",
        MutualfundHolders => "mutualfund_holders",
        InsiderTransactions => "insider_transactions",
        InsiderPurchases => "insider_purchases",
        InsiderRosterHolders => "insider_roster_holders",
    }
}

choice_enum! {
    /// Analyst recommendation kinds.
    RecommendationType, "recommendation type" {
        Recommendations => "recommendations",
        UpgradesDowngrades => "upgrades_downgrades",
    }
}

choice_enum! {
    /// Option chain side.
    OptionType, "option type" {
        Calls => "calls",
        Puts => "puts",
    }
}

/// A data operation with its normalized parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    HistoricalPrices { period: String, interval: String },
    StockInfo,
    News,
    StockActions,
    FinancialStatement { financial_type: FinancialType },
    HolderInfo { holder_type: HolderType },
    OptionExpirationDates,
    OptionChain {
        expiration_date: NaiveDate,
        option_type: OptionType,
    },
    Recommendations {
        recommendation_type: RecommendationType,
        months_back: u32,
    },
}

impl Operation {
    /// Historical prices; `None` selects the provider default.
    pub fn historical_prices(
        period: Option<&str>,
        interval: Option<&str>,
    ) -> Result<Self, OperationError> {
        let period = choose("period", period.unwrap_or(DEFAULT_PERIOD), VALID_PERIODS)?;
        let interval = choose(
            "interval",
            interval.unwrap_or(DEFAULT_INTERVAL),
            VALID_INTERVALS,
        )?;
        Ok(Self::HistoricalPrices { period, interval })
    }

    pub fn financial_statement(financial_type: &str) -> Result<Self, OperationError> {
        Ok(Self::FinancialStatement {
            financial_type: financial_type.parse()?,
        })
    }

    pub fn holder_info(holder_type: &str) -> Result<Self, OperationError> {
        Ok(Self::HolderInfo {
            holder_type: holder_type.parse()?,
        })
    }

    /// Option chain for an expiration date formatted `YYYY-MM-DD`.
    pub fn option_chain(expiration_date: &str, option_type: &str) -> Result<Self, OperationError> {
        let expiration_date =
            NaiveDate::parse_from_str(expiration_date.trim(), EXPIRATION_DATE_FORMAT).map_err(
                |e| OperationError::InvalidParameter {
                    parameter: "expiration date",
                    reason: format!("{:?} is not YYYY-MM-DD ({})", expiration_date, e),
                },
            )?;
        Ok(Self::OptionChain {
            expiration_date,
            option_type: option_type.parse()?,
        })
    }

    /// Analyst recommendations; `months_back` defaults to 12.
    pub fn recommendations(
        recommendation_type: &str,
        months_back: Option<u32>,
    ) -> Result<Self, OperationError> {
        let months_back = months_back.unwrap_or(DEFAULT_MONTHS_BACK);
        if months_back == 0 {
            return Err(OperationError::InvalidParameter {
                parameter: "months back",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self::Recommendations {
            recommendation_type: recommendation_type.parse()?,
            months_back,
        })
    }

    /// Stable operation name used as the first key component.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HistoricalPrices { .. } => "get_historical_stock_prices",
            Self::StockInfo => "get_stock_info",
            Self::News => "get_yahoo_finance_news",
            Self::StockActions => "get_stock_actions",
            Self::FinancialStatement { .. } => "get_financial_statement",
            Self::HolderInfo { .. } => "get_holder_info",
            Self::OptionExpirationDates => "get_option_expiration_dates",
            Self::OptionChain { .. } => "get_option_chain",
            Self::Recommendations { .. } => "get_recommendations",
        }
    }

    /// Build the canonical request key for this operation on `symbol`.
    pub fn request_key(&self, symbol: &str) -> Result<RequestKey, OperationError> {
        if normalize_symbol(symbol).is_empty() {
            return Err(OperationError::EmptySymbol);
        }
        let builder = RequestKey::builder(self.name(), symbol);
        let key = match self {
            // Re-checked here because deserialized operations skip the constructor.
            Self::HistoricalPrices { period, interval } => builder
                .param("period", choose("period", period, VALID_PERIODS)?)
                .param("interval", choose("interval", interval, VALID_INTERVALS)?)
                .build(),
            Self::FinancialStatement { financial_type } => {
                builder.param("financial_type", financial_type).build()
            }
            Self::HolderInfo { holder_type } => builder.param("holder_type", holder_type).build(),
            Self::OptionChain {
                expiration_date,
                option_type,
            } => builder
                .param(
                    "expiration_date",
                    expiration_date.format(EXPIRATION_DATE_FORMAT),
                )
                .param("option_type", option_type)
                .build(),
            Self::Recommendations {
                recommendation_type,
                months_back,
            } => {
                let builder = builder.param("recommendation_type", recommendation_type);
                // Only upgrades/downgrades are filtered by age.
                match recommendation_type {
                    RecommendationType::UpgradesDowngrades => {
                        builder.param("months_back", months_back).build()
                    }
                    RecommendationType::Recommendations => builder.build(),
                }
            }
            Self::StockInfo | Self::News | Self::StockActions | Self::OptionExpirationDates => {
                builder.build()
            }
        };
        Ok(key)
    }
}

fn choose(
    parameter: &'static str,
    value: &str,
    allowed: &[&str],
) -> Result<String, OperationError> {
    let value = value.trim();
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(OperationError::InvalidChoice {
            parameter,
            value: value.to_string(),
            allowed: allowed.join(", "),
        })
    }
}
