use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MarketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "BUYER",
            Role::Seller => "SELLER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUYER" => Some(Role::Buyer),
            "SELLER" => Some(Role::Seller),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub business_number: Option<String>,
}

impl Member {
    /// Sellers must carry a business registration number.
    pub fn new(
        id: Uuid,
        email: impl Into<String>,
        role: Role,
        business_number: Option<String>,
    ) -> Result<Self, MarketError> {
        if role == Role::Seller && business_number.is_none() {
            return Err(MarketError::BusinessNumberRequired);
        }
        Ok(Self {
            id,
            email: email.into(),
            role,
            business_number,
        })
    }

    pub fn buyer(id: Uuid, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            role: Role::Buyer,
            business_number: None,
        }
    }

    pub fn seller(id: Uuid, email: impl Into<String>, business_number: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            role: Role::Seller,
            business_number: Some(business_number.into()),
        }
    }
}
