//! Betfair-style JSON-RPC exchange client (C1, spec §4.1/§6).

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use governor::{state::InMemoryState, clock::DefaultClock, Quota, RateLimiter};
use layline_core::config::{Country, ExchangeCredentials};
use nonzero_ext::nonzero;
use layline_core::domain::Market;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::Mutex;

use crate::error::{ExchangeError, Result};
use crate::retry::with_retry;
use crate::types::{ClearedBet, MarketBook, MarketBookFull, OrderAck, OrderAckStatus};

const BALANCE_CACHE_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Typed wrapper over the exchange's JSON-RPC surface (spec §4.1).
///
/// Implemented by `BetfairExchangeClient` in production and by a test double
/// in `layline-engine`'s scheduler tests, so the scheduler never depends on
/// live HTTP.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn list_win_markets(&self, date: NaiveDate, countries: &BTreeSet<Country>) -> Result<Vec<Market>>;
    async fn get_book(&self, market_id: &str) -> Result<MarketBook>;
    async fn get_book_full(&self, market_id: &str, depth: u8) -> Result<MarketBookFull>;
    async fn submit_lay(
        &self,
        market_id: &str,
        selection_id: i64,
        size: Decimal,
        price: Decimal,
        handicap: i32,
    ) -> Result<OrderAck>;
    async fn list_cleared(&self, date_from: NaiveDate, date_to: NaiveDate) -> Result<Vec<ClearedBet>>;
    async fn get_balance(&self) -> Result<Decimal>;
}

struct BalanceCache {
    value: Decimal,
    fetched_at: Instant,
}

/// Production `ExchangeClient` backed by Betfair's Exchange API.
pub struct BetfairExchangeClient {
    http: Client,
    base_url: String,
    credentials: ExchangeCredentials,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
    session_token: Mutex<Option<String>>,
    balance_cache: Mutex<Option<BalanceCache>>,
}

impl BetfairExchangeClient {
    /// Creates a client rate-limited to 5 requests/second, the conservative
    /// default for Betfair's non-streaming API.
    #[must_use]
    pub fn new(credentials: ExchangeCredentials) -> Self {
        let quota = Quota::per_second(nonzero!(5u32));
        Self {
            http: Client::new(),
            base_url: credentials.base_url.clone(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            session_token: Mutex::new(None),
            balance_cache: Mutex::new(None),
        }
    }

    async fn ensure_session(&self) -> Result<String> {
        let mut guard = self.session_token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// One login attempt. A second failure after a mid-tick re-auth is
    /// surfaced as a non-retryable `Authentication` error by the caller
    /// (spec §7's AUTH_FAILED transition is owned by the scheduler, not
    /// this client).
    async fn login(&self) -> Result<String> {
        let url = format!("{}/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ])
            .header("X-Application", &self.credentials.app_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExchangeError::Authentication(format!(
                "login failed with status {}",
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct LoginResponse {
            session_token: String,
        }
        let body: LoginResponse = response.json().await?;
        Ok(body.session_token)
    }

    /// Posts `body` to `endpoint`, transparently re-authenticating once if
    /// the cached session token has expired (spec §5: "if it expires, the
    /// client auto-reauthenticates once per tick at most"). A second
    /// authentication failure surfaces to the caller as non-retryable.
    async fn post_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str, body: serde_json::Value) -> Result<T> {
        match self.post_json_once(endpoint, &body).await {
            Err(ExchangeError::Authentication(_)) => {
                *self.session_token.lock().await = None;
                self.post_json_once(endpoint, &body).await
            }
            other => other,
        }
    }

    async fn post_json_once<T: serde::de::DeserializeOwned>(&self, endpoint: &str, body: &serde_json::Value) -> Result<T> {
        self.rate_limiter.until_ready().await;
        let token = self.ensure_session().await?;
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .header("X-Application", &self.credentials.app_key)
            .header("X-Authentication", token)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ExchangeError::Authentication(format!("session rejected with status {status}")));
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ExchangeError::rate_limit(retry_after));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ExchangeError::api(status.as_u16(), message));
        }
        response.json().await.map_err(ExchangeError::from)
    }
}

#[async_trait]
impl ExchangeClient for BetfairExchangeClient {
    async fn list_win_markets(&self, date: NaiveDate, countries: &BTreeSet<Country>) -> Result<Vec<Market>> {
        let country_codes: Vec<&str> = countries.iter().map(|c| c.code()).collect();
        let body = json!({
            "filter": {
                "eventTypeIds": ["7"],
                "marketCountries": country_codes,
                "marketTypeCode": "WIN",
                "marketStartTime": { "from": date.and_hms_opt(0, 0, 0) },
            },
            "marketProjection": ["RUNNER_METADATA", "MARKET_START_TIME"],
        });

        with_retry(|_| {
            let body = body.clone();
            async move {
                let mut markets: Vec<Market> = self.post_json("/listMarketCatalogue", body).await?;
                markets.sort_by_key(|m| m.race_time);
                Ok(markets)
            }
        })
        .await
    }

    async fn get_book(&self, market_id: &str) -> Result<MarketBook> {
        let body = json!({
            "marketIds": [market_id],
            "priceProjection": { "priceData": ["EX_BEST_OFFERS"], "virtualise": true, "rolloverStakes": true },
        });
        with_retry(|_| {
            let body = body.clone();
            async move { self.post_json("/listMarketBook", body).await }
        })
        .await
    }

    async fn get_book_full(&self, market_id: &str, depth: u8) -> Result<MarketBookFull> {
        let body = json!({
            "marketIds": [market_id],
            "priceProjection": { "priceData": ["EX_ALL_OFFERS"], "virtualise": true },
            "depth": depth,
        });
        with_retry(|_| {
            let body = body.clone();
            async move { self.post_json("/listMarketBook", body).await }
        })
        .await
    }

    async fn submit_lay(
        &self,
        market_id: &str,
        selection_id: i64,
        size: Decimal,
        price: Decimal,
        handicap: i32,
    ) -> Result<OrderAck> {
        // Types are exact: size and price travel as JSON numbers, not
        // strings, and selection_id/handicap as integers (spec §4.1/§6).
        // Price snaps to the exchange's tick table before it goes on the
        // wire; the book prices rule() selected from are already tick-valid,
        // but this call makes no assumption about its caller.
        let price = layline_core::ticks::snap_to_tick(price);
        let body = json!({
            "marketId": market_id,
            "instructions": [{
                "selectionId": selection_id,
                "handicap": handicap,
                "side": "LAY",
                "orderType": "LIMIT",
                "limitOrder": {
                    "size": size.to_string().parse::<f64>().unwrap_or_default(),
                    "price": price.to_string().parse::<f64>().unwrap_or_default(),
                    "persistenceType": "LAPSE",
                },
            }],
        });
        with_retry(|_| {
            let body = body.clone();
            async move { self.post_json("/placeOrders", body).await }
        })
        .await
    }

    async fn list_cleared(&self, date_from: NaiveDate, date_to: NaiveDate) -> Result<Vec<ClearedBet>> {
        let body = json!({
            "settledDateRange": {
                "from": date_from.and_hms_opt(0, 0, 0),
                "to": date_to.and_hms_opt(23, 59, 59),
            },
        });
        with_retry(|_| {
            let body = body.clone();
            async move { self.post_json("/listClearedOrders", body).await }
        })
        .await
    }

    async fn get_balance(&self) -> Result<Decimal> {
        {
            let cache = self.balance_cache.lock().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < Duration::from_secs(BALANCE_CACHE_SECS) {
                    return Ok(entry.value);
                }
            }
        }

        let value: Decimal = with_retry(|_| async move {
            #[derive(serde::Deserialize)]
            struct AccountFunds {
                available_to_bet_balance: Decimal,
            }
            let funds: AccountFunds = self.post_json("/getAccountFunds", json!({})).await?;
            Ok(funds.available_to_bet_balance)
        })
        .await?;

        let mut cache = self.balance_cache.lock().await;
        *cache = Some(BalanceCache {
            value,
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}

/// Narrows a raw timestamp to `DateTime<Utc>`, treating anything
/// unparseable as a malformed response rather than panicking (spec §4.1).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ExchangeError::Malformed(format!("bad timestamp {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(base_url: String) -> ExchangeCredentials {
        ExchangeCredentials {
            app_key: "app-key".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            base_url,
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_token": "tok-1" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn submit_lay_snaps_price_to_tick_and_sends_numeric_fields() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/placeOrders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Success",
                "bet_id": "bet-1",
                "size_matched": "3.00",
                "avg_price_matched": "1.80",
                "error_code": null,
            })))
            .mount(&server)
            .await;

        let client = BetfairExchangeClient::new(credentials(server.uri()));
        // 1.804 has a 0.01 tick at this band and should snap to 1.80.
        let ack = client
            .submit_lay("1.23", 4_321, dec!(3.00), dec!(1.804), 0)
            .await
            .expect("submission succeeds");

        assert_eq!(ack.status, OrderAckStatus::Success);
        assert_eq!(ack.bet_id.as_deref(), Some("bet-1"));
    }

    #[tokio::test]
    async fn expired_session_triggers_one_reauth_then_succeeds() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/getAccountFunds"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getAccountFunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "available_to_bet_balance": "500.00" })))
            .mount(&server)
            .await;

        let client = BetfairExchangeClient::new(credentials(server.uri()));
        let balance = client.get_balance().await.expect("reauth recovers the call");
        assert_eq!(balance, dec!(500.00));
    }

    #[tokio::test]
    async fn rate_limit_response_is_retried_and_eventually_succeeds() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/getAccountFunds"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/getAccountFunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "available_to_bet_balance": "120.50" })))
            .mount(&server)
            .await;

        let client = BetfairExchangeClient::new(credentials(server.uri()));
        let balance = client.get_balance().await.expect("rate limit is retried");
        assert_eq!(balance, dec!(120.50));
    }

    #[tokio::test]
    async fn persistent_auth_failure_surfaces_as_non_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = BetfairExchangeClient::new(credentials(server.uri()));
        let result = client.get_balance().await;
        assert!(matches!(result, Err(ExchangeError::Authentication(_))));
    }

    #[test]
    fn timestamp_parsing_rejects_malformed_input() {
        assert!(parse_timestamp("2026-07-28T10:00:00Z").is_ok());
        assert!(matches!(parse_timestamp("not-a-date"), Err(ExchangeError::Malformed(_))));
    }
}
