use std::{collections::HashMap, fmt};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::constants::{
    ANDROID_PRO_MONTHLY_SKU, ANDROID_PRO_YEARLY_SKU, IOS_PRO_MONTHLY_SKU, IOS_PRO_YEARLY_SKU,
};

use super::entitlement::BillingPeriod;

/// Platform store the app is running against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// Subscription offering, independent of the platform it is sold on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductTier {
    ProMonthly,
    ProYearly,
}

impl ProductTier {
    pub const ALL: [ProductTier; 2] = [ProductTier::ProMonthly, ProductTier::ProYearly];

    pub fn billing_period(&self) -> BillingPeriod {
        match self {
            ProductTier::ProMonthly => BillingPeriod::Monthly,
            ProductTier::ProYearly => BillingPeriod::Yearly,
        }
    }

    /// Platform-specific SKU sold for this tier.
    pub fn sku(&self, platform: Platform) -> &'static str {
        match (self, platform) {
            (ProductTier::ProMonthly, Platform::Ios) => IOS_PRO_MONTHLY_SKU,
            (ProductTier::ProYearly, Platform::Ios) => IOS_PRO_YEARLY_SKU,
            (ProductTier::ProMonthly, Platform::Android) => ANDROID_PRO_MONTHLY_SKU,
            (ProductTier::ProYearly, Platform::Android) => ANDROID_PRO_YEARLY_SKU,
        }
    }

    /// All SKUs sold on the given platform.
    pub fn skus(platform: Platform) -> Vec<String> {
        Self::ALL
            .iter()
            .map(|tier| tier.sku(platform).to_string())
            .collect()
    }
}

static SKU_TABLE: Lazy<HashMap<&'static str, (ProductTier, Platform)>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for tier in ProductTier::ALL {
        for platform in [Platform::Ios, Platform::Android] {
            table.insert(tier.sku(platform), (tier, platform));
        }
    }
    table
});

/// Reverse lookup of a store SKU against the product table.
pub fn tier_for_sku(sku: &str) -> Option<ProductTier> {
    SKU_TABLE.get(sku).map(|(tier, _)| *tier)
}

/// Billing period of a store SKU, if it is one we sell.
pub fn billing_period_for_sku(sku: &str) -> Option<BillingPeriod> {
    tier_for_sku(sku).map(|tier| tier.billing_period())
}
