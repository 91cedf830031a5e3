//! Line-delimited JSON protocol.
//!
//! Each request is one JSON object on one line, tagged by `"op"`; each reply is
//! one line holding either `{"ok": ...}` or `{"error": {"kind", "message"}}`.
//! Requests on a connection are answered in order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::error::MarketError;
use crate::limits::MAX_LINE_LEN;
use crate::market::Marketplace;
use crate::model::ReservationQuery;
use crate::observability::{self, request_label};
use crate::params::{self, parse_id, parse_range};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    Search {
        #[serde(default)]
        params: HashMap<String, String>,
    },
    GetListing {
        id: String,
    },
    CreateListing {
        user_id: String,
        listing: Value,
    },
    UpdateListing {
        id: String,
        user_id: String,
        listing: Value,
    },
    DeleteListing {
        id: String,
        user_id: String,
    },
    Book {
        listing_id: String,
        user_id: String,
        start_date: String,
        end_date: String,
    },
    CancelReservation {
        reservation_id: String,
        user_id: String,
    },
    ListReservations {
        listing_id: Option<String>,
        user_id: Option<String>,
        #[serde(alias = "authorId")]
        owner_user_id: Option<String>,
    },
    Calendar {
        listing_id: String,
        start_date: String,
        end_date: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Ok(Value),
    Error(ErrorBody),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&MarketError> for Reply {
    fn from(e: &MarketError) -> Self {
        Reply::Error(ErrorBody {
            kind: e.kind(),
            message: e.to_string(),
        })
    }
}

pub struct MarketHandler {
    market: Arc<Marketplace>,
}

impl MarketHandler {
    pub fn new(market: Arc<Marketplace>) -> Self {
        Self { market }
    }

    /// Parse and execute one request line.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let request: Request = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => "invalid", "status" => "error")
                    .increment(1);
                return Reply::from(&MarketError::InvalidInput(format!("bad request: {e}")));
            }
        };

        let label = request_label(&request);
        let start = Instant::now();
        let result = self.execute(request).await;
        metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => label)
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(payload) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => "ok")
                    .increment(1);
                Reply::Ok(payload)
            }
            Err(e) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "op" => label, "status" => "error")
                    .increment(1);
                if e.is_fault() {
                    warn!("{label} failed: {e}");
                }
                Reply::from(&e)
            }
        }
    }

    async fn execute(&self, request: Request) -> Result<Value, MarketError> {
        let market = &self.market;
        match request {
            Request::Search { params } => {
                let (filter, range) = params::parse_search_params(&params)?;
                to_json(&market.search(&filter, range).await?)
            }
            Request::GetListing { id } => to_json(&market.get_listing(parse_id(&id)?).await?),
            Request::CreateListing { user_id, listing } => {
                let draft = params::parse_listing_form(listing)?;
                to_json(&market.create_listing(draft, &user_id).await?)
            }
            Request::UpdateListing {
                id,
                user_id,
                listing,
            } => {
                let id = parse_id(&id)?;
                let patch = params::parse_listing_patch(listing)?;
                to_json(&market.update_listing(id, &user_id, patch).await?)
            }
            Request::DeleteListing { id, user_id } => {
                market.delete_listing(parse_id(&id)?, &user_id).await?;
                Ok(Value::Null)
            }
            Request::Book {
                listing_id,
                user_id,
                start_date,
                end_date,
            } => {
                let listing_id = parse_id(&listing_id)?;
                let range = parse_range(&start_date, &end_date)?;
                to_json(&market.book(listing_id, &user_id, range).await?)
            }
            Request::CancelReservation {
                reservation_id,
                user_id,
            } => {
                market
                    .cancel_reservation(parse_id(&reservation_id)?, &user_id)
                    .await?;
                Ok(Value::Null)
            }
            Request::ListReservations {
                listing_id,
                user_id,
                owner_user_id,
            } => {
                let query = ReservationQuery {
                    listing_id: listing_id.as_deref().map(parse_id).transpose()?,
                    user_id,
                    owner_user_id,
                };
                to_json(&market.list_reservations(&query).await?)
            }
            Request::Calendar {
                listing_id,
                start_date,
                end_date,
            } => {
                let listing_id = parse_id(&listing_id)?;
                let window = parse_range(&start_date, &end_date)?;
                to_json(&market.calendar(listing_id, window).await?)
            }
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, MarketError> {
    serde_json::to_value(value).map_err(|e| MarketError::StoreFault(format!("encode reply: {e}")))
}

fn encode(reply: &Reply) -> String {
    serde_json::to_string(reply).unwrap_or_else(|e| {
        format!(r#"{{"error":{{"kind":"StoreFault","message":"encode reply: {e}"}}}}"#)
    })
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    handler: Arc<MarketHandler>,
) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let e = MarketError::InvalidInput(format!("request line exceeds {MAX_LINE_LEN} bytes"));
                lines.send(encode(&Reply::from(&e))).await?;
                debug!("closing connection after oversized line");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handler.handle_line(&line).await;
        lines.send(encode(&reply)).await?;
    }
    Ok(())
}

/// Accept loop with a connection cap. Stops accepting when `shutdown`
/// resolves, then waits up to `drain_timeout` for open connections.
pub async fn serve(
    listener: TcpListener,
    market: Arc<Marketplace>,
    max_connections: usize,
    drain_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) {
    let handler = Arc::new(MarketHandler::new(market));
    let semaphore = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let handler = handler.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = process_connection(socket, handler).await {
                        error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(drain_timeout);
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}
