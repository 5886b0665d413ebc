//! Ledger API client.
//!
//! Dates travel as packed `YYYYMMDD` integers and the idempotency id is
//! called `importedId` on the wire.

use super::{ApiClient, ClientError};
use async_trait::async_trait;
use chrono::NaiveDate;
use ledgerbridge_engine::{
    encode_packed_date, ExternalError, Ledger, LedgerAccount, LedgerTransaction, MinorUnits,
    NewLedgerTransaction, PackedDate,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
    id: String,
    amount: MinorUnits,
    date: PackedDate,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    imported_id: Option<String>,
}

impl WireTransaction {
    fn into_transaction(self, account_id: &str) -> LedgerTransaction {
        LedgerTransaction {
            id: self.id,
            account_id: account_id.to_string(),
            amount: self.amount,
            date: self.date.date(),
            notes: self.notes,
            idempotency_id: self.imported_id,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionRequest<'a> {
    amount: MinorUnits,
    date: i64,
    notes: &'a str,
    imported_id: &'a str,
}

/// [`Ledger`] backed by the ledger HTTP API.
#[derive(Clone)]
pub struct HttpLedger {
    api: ApiClient,
}

impl HttpLedger {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            api: ApiClient::new(base_url, token, timeout)?,
        })
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn ping(&self) -> Result<(), ExternalError> {
        let url = self.api.url(&["health"])?;
        self.api.send(self.api.get(url)).await?;
        Ok(())
    }

    async fn find_account_by_name(
        &self,
        name: &str,
    ) -> Result<Option<LedgerAccount>, ExternalError> {
        let url = self.api.url(&["accounts"])?;
        let accounts: Vec<LedgerAccount> = self
            .api
            .send_json(self.api.get(url).query(&[("name", name)]))
            .await?;
        // The API filter may be fuzzy; only an exact name is a match
        Ok(accounts.into_iter().find(|account| account.name == name))
    }

    async fn list_transactions(
        &self,
        account_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<LedgerTransaction>, ExternalError> {
        let url = self.api.url(&["accounts", account_id, "transactions"])?;
        let since = packed(since)?.to_string();
        let rows: Vec<WireTransaction> = self
            .api
            .send_json(self.api.get(url).query(&[("since", since.as_str())]))
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_transaction(account_id))
            .collect())
    }

    async fn create_transaction(
        &self,
        account_id: &str,
        transaction: NewLedgerTransaction,
    ) -> Result<LedgerTransaction, ExternalError> {
        let url = self.api.url(&["accounts", account_id, "transactions"])?;
        let body = CreateTransactionRequest {
            amount: transaction.amount,
            date: packed(transaction.date)?,
            notes: &transaction.notes,
            imported_id: &transaction.idempotency_id,
        };
        let created: WireTransaction = self.api.send_json(self.api.post(url).json(&body)).await?;
        Ok(created.into_transaction(account_id))
    }
}

fn packed(date: NaiveDate) -> Result<i64, ExternalError> {
    encode_packed_date(date).map_err(|e| ExternalError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::stub;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn ledger(router: Router) -> HttpLedger {
        let base = stub::serve(router).await;
        HttpLedger::new(&base, None, Duration::from_secs(5)).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    #[tokio::test]
    async fn finds_account_by_exact_name() {
        let router = Router::new().route(
            "/accounts",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                assert_eq!(query["name"], "Points: Ada");
                Json(json!([
                    {"id": "acct-9", "name": "Points: Adam"},
                    {"id": "acct-1", "name": "Points: Ada"}
                ]))
            }),
        );
        let ledger = ledger(router).await;

        let account = ledger.find_account_by_name("Points: Ada").await.unwrap();
        assert_eq!(account.map(|a| a.id), Some("acct-1".to_string()));

        let missing = ledger.find_account_by_name("Points: Zed").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn transactions_decode_packed_dates() {
        let router = Router::new().route(
            "/accounts/{account_id}/transactions",
            get(
                |Path(account_id): Path<String>,
                 Query(query): Query<HashMap<String, String>>| async move {
                    assert_eq!(account_id, "acct-1");
                    assert_eq!(query["since"], "20241001");
                    Json(json!([
                        {"id": "tx-1", "amount": 200, "date": 20241014, "notes": "Gift"},
                        {"id": "tx-2", "amount": 150, "date": 20241015,
                         "importedId": "push:kid-1:2024-10-15"}
                    ]))
                },
            ),
        );
        let rows = ledger(router)
            .await
            .list_transactions("acct-1", day(1))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, day(14));
        assert_eq!(rows[0].account_id, "acct-1");
        assert_eq!(rows[0].idempotency_id, None);
        assert_eq!(rows[1].idempotency_id.as_deref(), Some("push:kid-1:2024-10-15"));
    }

    #[tokio::test]
    async fn malformed_date_is_a_decode_error() {
        let router = Router::new().route(
            "/accounts/{account_id}/transactions",
            get(|| async { Json(json!([{"id": "tx-1", "amount": 200, "date": 20241345}])) }),
        );
        let err = ledger(router)
            .await
            .list_transactions("acct-1", day(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::Decode(_)));
    }

    #[tokio::test]
    async fn unencodable_date_is_not_sent() {
        let ledger = ledger(Router::new()).await;
        let ancient = NaiveDate::from_ymd_opt(999, 12, 31).unwrap();

        let err = ledger.list_transactions("acct-1", ancient).await.unwrap_err();
        assert!(matches!(err, ExternalError::Encode(_)));

        let new_tx = NewLedgerTransaction {
            amount: 150,
            date: ancient,
            notes: "Points sync: +15 pts (1.50 USD)".into(),
            idempotency_id: "push:kid-1:0999-12-31".into(),
        };
        let err = ledger.create_transaction("acct-1", new_tx).await.unwrap_err();
        assert!(matches!(err, ExternalError::Encode(_)));
    }

    #[tokio::test]
    async fn create_sends_imported_id() {
        let router = Router::new().route(
            "/accounts/{account_id}/transactions",
            axum::routing::post(|Json(body): Json<Value>| async move {
                assert_eq!(body["date"], 20241015);
                assert_eq!(body["importedId"], "push:kid-1:2024-10-15");
                Json(json!({
                    "id": "tx-77",
                    "amount": body["amount"],
                    "date": body["date"],
                    "notes": body["notes"],
                    "importedId": body["importedId"]
                }))
            }),
        );
        let created = ledger(router)
            .await
            .create_transaction(
                "acct-1",
                NewLedgerTransaction {
                    amount: 150,
                    date: day(15),
                    notes: "Points sync: +15 pts (1.50 USD)".into(),
                    idempotency_id: "push:kid-1:2024-10-15".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(created.id, "tx-77");
        assert_eq!(created.amount, 150);
        assert_eq!(created.date, day(15));
        assert_eq!(created.idempotency_id.as_deref(), Some("push:kid-1:2024-10-15"));
    }
}
