//! services/api/src/adapters/reward_cards.rs
//!
//! Hands out a collectible card for every completed lesson. Cards come from a static
//! catalogue; the tier depends on the review score.

use amibuddy_core::domain::{HomeworkReview, RewardCard};
use amibuddy_core::ports::{PortResult, RewardCardService};
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardTier {
    Gold,
    Silver,
    Bronze,
    /// The lesson was finished without a review.
    Participation,
}

impl CardTier {
    pub fn for_review(review: Option<&HomeworkReview>) -> Self {
        match review.map(|r| r.score) {
            Some(90..) => CardTier::Gold,
            Some(70..=89) => CardTier::Silver,
            Some(_) => CardTier::Bronze,
            None => CardTier::Participation,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CardTier::Gold => "gold",
            CardTier::Silver => "silver",
            CardTier::Bronze => "bronze",
            CardTier::Participation => "participation",
        }
    }
}

#[derive(Clone)]
pub struct CatalogueRewardCards {
    base_url: String,
}

impl CatalogueRewardCards {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RewardCardService for CatalogueRewardCards {
    async fn issue_card(
        &self,
        _user_id: Uuid,
        review: Option<&HomeworkReview>,
    ) -> PortResult<RewardCard> {
        let tier = CardTier::for_review(review);
        Ok(RewardCard {
            url: format!("{}/{}.png", self.base_url, tier.as_str()),
        })
    }
}
