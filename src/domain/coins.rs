use std::fmt;

/// Coins are whole units; there is no fractional part.
pub type Coins = i64;

/// Parse a user supplied coin amount. Only positive whole numbers are accepted.
/// Example: "500" -> 500, " 12 " -> 12
pub fn parse_coins(input: &str) -> Result<Coins, ParseCoinsError> {
    let amount: Coins = input
        .trim()
        .parse()
        .map_err(|_| ParseCoinsError::InvalidFormat)?;
    if amount <= 0 {
        return Err(ParseCoinsError::NotPositive);
    }
    Ok(amount)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCoinsError {
    InvalidFormat,
    NotPositive,
}

impl fmt::Display for ParseCoinsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCoinsError::InvalidFormat => write!(f, "invalid coin amount"),
            ParseCoinsError::NotPositive => write!(f, "coin amount must be positive"),
        }
    }
}

impl std::error::Error for ParseCoinsError {}
