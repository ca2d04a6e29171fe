/// Subscription catalog entry reported by the platform store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSubscription {
    pub product_id: String,
    pub title: String,
    pub localized_price: String,
    pub currency: String,
    /// Base plans and offers (Google Play only). Empty on the App Store.
    pub offers: Vec<SubscriptionOffer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionOffer {
    pub base_plan_id: String,
    pub offer_token: String,
}

/// Non-subscription catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreProduct {
    pub product_id: String,
    pub title: String,
    pub localized_price: String,
    pub currency: String,
}
