use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use agora::market::{
    HoldingRecord, InstrumentKey, InstrumentRecord, MarketError, MarketName, MarketNode,
    ParticipantId, Quantity,
};
use agora::peer::PeerDirectory;

use crate::udp;

//Applied to every outbound peer call, RPC and datagram alike
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddInstrumentRequest {
    pub id: String,
    pub category: String,
    pub capacity: Quantity,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AddInstrumentResponse {
    pub market: MarketName,
    pub key: InstrumentKey,
    pub capacity: Quantity,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoveInstrumentRequest {
    pub id: String,
    pub category: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoveInstrumentResponse {
    pub market: MarketName,
    pub key: InstrumentKey,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PurchaseRequest {
    pub participant: ParticipantId,
    pub id: String,
    pub category: String,
    pub qty: Quantity,
    //Set by the forwarding node; a relayed request never produces another hop
    #[serde(default)]
    pub relayed: bool,
}

impl PurchaseRequest {
    pub fn new(
        participant: impl Into<ParticipantId>,
        category: impl Into<String>,
        id: impl Into<String>,
        qty: Quantity,
    ) -> Self {
        Self {
            participant: participant.into(),
            id: id.into(),
            category: category.into(),
            qty,
            relayed: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PurchaseRemoteRequest {
    pub participant: ParticipantId,
    pub id: String,
    pub category: String,
    pub qty: Quantity,
    pub target_market: MarketName,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SellRequest {
    pub participant: ParticipantId,
    pub id: String,
    pub qty: Quantity,
    #[serde(default)]
    pub relayed: bool,
}

impl SellRequest {
    pub fn new(participant: impl Into<ParticipantId>, id: impl Into<String>, qty: Quantity) -> Self {
        Self {
            participant: participant.into(),
            id: id.into(),
            qty,
            relayed: false,
        }
    }
}

//Category is carried for interface parity; the executing node recovers it from the
//holding key and ignores the supplied value
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SellRemoteRequest {
    pub participant: ParticipantId,
    pub id: String,
    pub category: String,
    pub qty: Quantity,
    pub target_market: MarketName,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SharesRequest {
    pub participant: ParticipantId,
    #[serde(default)]
    pub relayed: bool,
}

impl SharesRequest {
    pub fn new(participant: impl Into<ParticipantId>) -> Self {
        Self {
            participant: participant.into(),
            relayed: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum TradeSide {
    Purchase,
    Sell,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TradeResponse {
    //Market that actually executed the trade, a peer when forwarded
    pub market: MarketName,
    pub key: InstrumentKey,
    pub quantity: Quantity,
    pub side: TradeSide,
    pub forwarded: bool,
}

impl TradeResponse {
    pub fn summary(&self) -> String {
        let base = match self.side {
            TradeSide::Purchase => {
                format!("Purchase successful. You bought {} of {}", self.quantity, self.key)
            }
            TradeSide::Sell => {
                format!("Sell operation successful. Sold {} of {}", self.quantity, self.key)
            }
        };
        if self.forwarded {
            format!("Cross-market trade executed on {}: {}", self.market, base)
        } else {
            base
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MarketAvailability {
    pub market: MarketName,
    pub shares: Vec<InstrumentRecord>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AvailabilityResponse {
    pub markets: Vec<MarketAvailability>,
}

impl AvailabilityResponse {
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for market in &self.markets {
            lines.push(format!("{} Market:", market.market));
            for share in &market.shares {
                lines.push(format!(
                    "[Share ID: {}, Type: {}, Available: {}]",
                    share.id, share.category, share.available
                ));
            }
        }
        lines.join("\n")
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MarketHoldings {
    pub market: MarketName,
    pub holdings: Vec<HoldingRecord>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SharesResponse {
    //Non-empty sections only, own market first, peers in directory order
    pub sections: Vec<MarketHoldings>,
}

impl SharesResponse {
    pub fn render(&self) -> String {
        if self.sections.is_empty() {
            return "You do not own any shares in any market.".to_string();
        }
        let mut out = String::from("Your Shares:\n");
        for section in &self.sections {
            out.push_str(&format!("{} Market Shares:\n", section.market));
            for holding in &section.holdings {
                out.push_str(&format!(
                    "[Share: {}, Owned: {}]\n",
                    holding.key, holding.owned
                ));
            }
        }
        out
    }
}

//The serialized MarketError is the error body, so callers get the tagged variant back
#[derive(Debug)]
pub struct ApiError(pub MarketError);

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        Self(err)
    }
}

impl actix_web::ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self.0 {
            MarketError::AlreadyExists { .. }
            | MarketError::InsufficientCapacity { .. }
            | MarketError::InsufficientHoldings { .. }
            | MarketError::InvalidMarket { .. } => actix_web::http::StatusCode::BAD_REQUEST,
            MarketError::InstrumentNotFound { .. }
            | MarketError::HoldingNotFound { .. }
            | MarketError::NotFoundAnywhere { .. } => actix_web::http::StatusCode::NOT_FOUND,
            MarketError::RemoteUnavailable { .. } => actix_web::http::StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(self.status_code()).json(&self.0)
    }
}

//A rejection is a definitive answer from a live peer; unreachable covers transport
//failures and timeouts
enum PeerReply<T> {
    Answer(T),
    Rejected(MarketError),
    Unreachable,
}

pub trait Client {
    fn add_instrument(
        &self,
        req: AddInstrumentRequest,
    ) -> impl Future<Output = Result<AddInstrumentResponse>>;
    fn remove_instrument(
        &self,
        req: RemoveInstrumentRequest,
    ) -> impl Future<Output = Result<RemoveInstrumentResponse>>;
    fn purchase(&self, req: PurchaseRequest) -> impl Future<Output = Result<TradeResponse>>;
    fn purchase_remote(
        &self,
        req: PurchaseRemoteRequest,
    ) -> impl Future<Output = Result<TradeResponse>>;
    fn sell(&self, req: SellRequest) -> impl Future<Output = Result<TradeResponse>>;
    fn sell_remote(&self, req: SellRemoteRequest) -> impl Future<Output = Result<TradeResponse>>;
    fn get_shares(&self, participant: String) -> impl Future<Output = Result<SharesResponse>>;
    fn list_availability(
        &self,
        category: String,
    ) -> impl Future<Output = Result<AvailabilityResponse>>;
}

//The lock guard is always dropped before any outbound peer call, so two nodes
//forwarding to each other cannot deadlock on each other's lock
pub struct AppState {
    name: MarketName,
    market: Arc<RwLock<MarketNode>>,
    peers: PeerDirectory,
    http: reqwest::Client,
    audit: Option<crate::audit::AuditLog>,
}

impl AppState {
    pub fn new(node: MarketNode, peers: PeerDirectory) -> Self {
        Self {
            name: node.name().to_string(),
            market: Arc::new(RwLock::new(node)),
            peers,
            http: reqwest::Client::builder()
                .timeout(REMOTE_TIMEOUT)
                .build()
                .expect("reqwest client"),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: crate::audit::AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn market_name(&self) -> &str {
        &self.name
    }

    //Handle shared with the availability responder
    pub fn market(&self) -> Arc<RwLock<MarketNode>> {
        Arc::clone(&self.market)
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    fn audit(&self, operation: &str, params: &str, success: bool) {
        if let Some(audit) = &self.audit {
            audit.record(operation, params, success);
        }
    }

    pub fn add_instrument(
        &self,
        req: &AddInstrumentRequest,
    ) -> Result<AddInstrumentResponse, MarketError> {
        let result = {
            let mut market = self.market.write().unwrap();
            market.add_instrument(&req.category, &req.id, req.capacity)
        };
        self.audit(
            "Add Share",
            &format!(
                "ShareID: {}, ShareType: {}, Capacity: {}",
                req.id, req.category, req.capacity
            ),
            result.is_ok(),
        );
        result.map(|()| AddInstrumentResponse {
            market: self.name.clone(),
            key: InstrumentKey::new(&req.category, &req.id),
            capacity: req.capacity,
        })
    }

    pub fn remove_instrument(
        &self,
        req: &RemoveInstrumentRequest,
    ) -> Result<RemoveInstrumentResponse, MarketError> {
        let result = {
            let mut market = self.market.write().unwrap();
            market.remove_instrument(&req.category, &req.id)
        };
        self.audit(
            "Remove Share",
            &format!("ShareID: {}, ShareType: {}", req.id, req.category),
            result.is_ok(),
        );
        result.map(|()| RemoveInstrumentResponse {
            market: self.name.clone(),
            key: InstrumentKey::new(&req.category, &req.id),
        })
    }

    pub async fn purchase(&self, req: PurchaseRequest) -> Result<TradeResponse, MarketError> {
        let local = {
            let mut market = self.market.write().unwrap();
            market.purchase(&req.participant, &req.category, &req.id, req.qty)
        };
        let result = match local {
            Ok(()) => Ok(TradeResponse {
                market: self.name.clone(),
                key: InstrumentKey::new(&req.category, &req.id),
                quantity: req.qty,
                side: TradeSide::Purchase,
                forwarded: false,
            }),
            // A local miss on an originating call is what triggers discovery across
            // the federation. Relayed calls stop here.
            Err(MarketError::InstrumentNotFound { .. }) if !req.relayed => {
                self.forward_purchase(&req).await
            }
            Err(err) => Err(err),
        };
        self.audit(
            "Purchase Share",
            &format!(
                "BuyerID: {}, ShareID: {}, ShareType: {}, Quantity: {}",
                req.participant, req.id, req.category, req.qty
            ),
            result.is_ok(),
        );
        result
    }

    async fn forward_purchase(&self, req: &PurchaseRequest) -> Result<TradeResponse, MarketError> {
        let relayed = PurchaseRequest {
            relayed: true,
            ..req.clone()
        };
        let mut reached_any = false;
        for (name, address) in self.peers.iter() {
            match self
                .post_peer::<_, TradeResponse>(name, &address.rpc, "/purchase", &relayed)
                .await
            {
                PeerReply::Answer(response) => {
                    return Ok(TradeResponse {
                        forwarded: true,
                        ..response
                    })
                }
                PeerReply::Rejected(MarketError::InstrumentNotFound { .. }) => {
                    reached_any = true;
                }
                PeerReply::Rejected(err) => return Err(err),
                PeerReply::Unreachable => {}
            }
        }
        self.exhausted(reached_any, &req.id)
    }

    pub async fn purchase_remote(
        &self,
        req: PurchaseRemoteRequest,
    ) -> Result<TradeResponse, MarketError> {
        let address = match self.peers.get(&req.target_market) {
            Some(address) => address.clone(),
            None => {
                self.audit(
                    "Purchase Remote Share",
                    &format!(
                        "BuyerID: {}, ShareID: {}, Target: {}",
                        req.participant, req.id, req.target_market
                    ),
                    false,
                );
                return Err(MarketError::InvalidMarket {
                    market: req.target_market,
                });
            }
        };
        let relayed = PurchaseRequest {
            participant: req.participant.clone(),
            id: req.id.clone(),
            category: req.category.clone(),
            qty: req.qty,
            relayed: true,
        };
        let result = match self
            .post_peer::<_, TradeResponse>(&req.target_market, &address.rpc, "/purchase", &relayed)
            .await
        {
            PeerReply::Answer(response) => Ok(TradeResponse {
                forwarded: true,
                ..response
            }),
            PeerReply::Rejected(err) => Err(err),
            PeerReply::Unreachable => Err(MarketError::RemoteUnavailable {
                markets: vec![req.target_market.clone()],
            }),
        };
        self.audit(
            "Purchase Remote Share",
            &format!(
                "BuyerID: {}, ShareID: {}, Target: {}, Quantity: {}",
                req.participant, req.id, req.target_market, req.qty
            ),
            result.is_ok(),
        );
        result
    }

    pub async fn sell(&self, req: SellRequest) -> Result<TradeResponse, MarketError> {
        let local = {
            let mut market = self.market.write().unwrap();
            market.sell(&req.participant, &req.id, req.qty)
        };
        let result = match local {
            Ok(key) => Ok(TradeResponse {
                market: self.name.clone(),
                key,
                quantity: req.qty,
                side: TradeSide::Sell,
                forwarded: false,
            }),
            Err(MarketError::HoldingNotFound { .. }) if !req.relayed => {
                self.forward_sell(&req).await
            }
            Err(err) => Err(err),
        };
        self.audit(
            "Sell Share",
            &format!(
                "BuyerID: {}, ShareID: {}, Quantity: {}",
                req.participant, req.id, req.qty
            ),
            result.is_ok(),
        );
        result
    }

    async fn forward_sell(&self, req: &SellRequest) -> Result<TradeResponse, MarketError> {
        let relayed = SellRequest {
            relayed: true,
            ..req.clone()
        };
        let mut reached_any = false;
        for (name, address) in self.peers.iter() {
            match self
                .post_peer::<_, TradeResponse>(name, &address.rpc, "/sell", &relayed)
                .await
            {
                PeerReply::Answer(response) => {
                    return Ok(TradeResponse {
                        forwarded: true,
                        ..response
                    })
                }
                PeerReply::Rejected(MarketError::HoldingNotFound { .. }) => {
                    reached_any = true;
                }
                PeerReply::Rejected(err) => return Err(err),
                PeerReply::Unreachable => {}
            }
        }
        self.exhausted(reached_any, &req.id)
    }

    pub async fn sell_remote(&self, req: SellRemoteRequest) -> Result<TradeResponse, MarketError> {
        let address = match self.peers.get(&req.target_market) {
            Some(address) => address.clone(),
            None => {
                self.audit(
                    "Sell Remote Share",
                    &format!(
                        "BuyerID: {}, ShareID: {}, Target: {}",
                        req.participant, req.id, req.target_market
                    ),
                    false,
                );
                return Err(MarketError::InvalidMarket {
                    market: req.target_market,
                });
            }
        };
        let relayed = SellRequest {
            participant: req.participant.clone(),
            id: req.id.clone(),
            qty: req.qty,
            relayed: true,
        };
        let result = match self
            .post_peer::<_, TradeResponse>(&req.target_market, &address.rpc, "/sell", &relayed)
            .await
        {
            PeerReply::Answer(response) => Ok(TradeResponse {
                forwarded: true,
                ..response
            }),
            PeerReply::Rejected(err) => Err(err),
            PeerReply::Unreachable => Err(MarketError::RemoteUnavailable {
                markets: vec![req.target_market.clone()],
            }),
        };
        self.audit(
            "Sell Remote Share",
            &format!(
                "BuyerID: {}, ShareID: {}, Target: {}, Quantity: {}",
                req.participant, req.id, req.target_market, req.qty
            ),
            result.is_ok(),
        );
        result
    }

    //Peer sections are fetched with relayed = true so no peer fans out further;
    //unreachable peers are skipped and the report is best-effort
    pub async fn get_shares(&self, req: SharesRequest) -> SharesResponse {
        let local = {
            let market = self.market.read().unwrap();
            market.holdings_for(&req.participant)
        };
        let mut sections = Vec::new();
        if !local.is_empty() {
            sections.push(MarketHoldings {
                market: self.name.clone(),
                holdings: local,
            });
        }
        if !req.relayed {
            let relayed = SharesRequest {
                participant: req.participant.clone(),
                relayed: true,
            };
            for (name, address) in self.peers.iter() {
                match self
                    .post_peer::<_, SharesResponse>(name, &address.rpc, "/shares", &relayed)
                    .await
                {
                    PeerReply::Answer(response) => sections.extend(response.sections),
                    PeerReply::Rejected(err) => {
                        log::warn!("shares query rejected by {name}: {err}")
                    }
                    PeerReply::Unreachable => log::warn!("shares query to {name} unanswered"),
                }
            }
        }
        self.audit(
            "Get Shares",
            &format!("BuyerID: {}", req.participant),
            true,
        );
        SharesResponse { sections }
    }

    //Local scan plus one availability datagram per peer; peers that time out or
    //answer with nothing are omitted
    pub async fn list_availability(&self, category: &str) -> AvailabilityResponse {
        let local = {
            let market = self.market.read().unwrap();
            market.availability(category)
        };
        let mut markets = Vec::new();
        if !local.is_empty() {
            markets.push(MarketAvailability {
                market: self.name.clone(),
                shares: local,
            });
        }
        for (name, address) in self.peers.iter() {
            match udp::query(&address.udp, category, REMOTE_TIMEOUT).await {
                Ok(payload) => {
                    let shares: Vec<InstrumentRecord> = payload
                        .lines()
                        .filter_map(InstrumentRecord::parse_line)
                        .collect();
                    if !shares.is_empty() {
                        markets.push(MarketAvailability {
                            market: name.clone(),
                            shares,
                        });
                    }
                }
                Err(err) => log::warn!("availability broadcast to {name} failed: {err}"),
            }
        }
        self.audit(
            "List Share Availability",
            &format!("ShareType: {category}"),
            true,
        );
        AvailabilityResponse { markets }
    }

    fn exhausted(&self, reached_any: bool, id: &str) -> Result<TradeResponse, MarketError> {
        if reached_any || self.peers.is_empty() {
            Err(MarketError::NotFoundAnywhere { id: id.to_string() })
        } else {
            Err(MarketError::RemoteUnavailable {
                markets: self.peers.iter().map(|(name, _)| name.clone()).collect(),
            })
        }
    }

    async fn post_peer<Req, Resp>(
        &self,
        peer: &str,
        base: &str,
        path: &str,
        req: &Req,
    ) -> PeerReply<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let sent = self
            .http
            .post(format!("{base}{path}"))
            .json(req)
            .send()
            .await;
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                log::warn!("peer {peer} unreachable on {path}: {err}");
                return PeerReply::Unreachable;
            }
        };
        if response.status().is_success() {
            match response.json::<Resp>().await {
                Ok(body) => PeerReply::Answer(body),
                Err(err) => {
                    log::warn!("peer {peer} sent malformed body on {path}: {err}");
                    PeerReply::Unreachable
                }
            }
        } else {
            match response.json::<MarketError>().await {
                Ok(err) => PeerReply::Rejected(err),
                Err(err) => {
                    log::warn!("peer {peer} sent malformed error on {path}: {err}");
                    PeerReply::Unreachable
                }
            }
        }
    }
}

pub mod server {
    use actix_web::{get, post, web};

    use super::{
        AddInstrumentRequest, AddInstrumentResponse, ApiError, AppState, AvailabilityResponse,
        PurchaseRemoteRequest, PurchaseRequest, RemoveInstrumentRequest, RemoveInstrumentResponse,
        SellRemoteRequest, SellRequest, SharesRequest, SharesResponse, TradeResponse,
    };

    pub fn routes(cfg: &mut web::ServiceConfig) {
        cfg.service(add_instrument)
            .service(remove_instrument)
            .service(purchase)
            .service(purchase_remote)
            .service(sell)
            .service(sell_remote)
            .service(get_shares)
            .service(list_availability);
    }

    #[post("/instrument/add")]
    pub async fn add_instrument(
        app: web::Data<AppState>,
        req: web::Json<AddInstrumentRequest>,
    ) -> Result<web::Json<AddInstrumentResponse>, ApiError> {
        Ok(web::Json(app.add_instrument(&req.into_inner())?))
    }

    #[post("/instrument/remove")]
    pub async fn remove_instrument(
        app: web::Data<AppState>,
        req: web::Json<RemoveInstrumentRequest>,
    ) -> Result<web::Json<RemoveInstrumentResponse>, ApiError> {
        Ok(web::Json(app.remove_instrument(&req.into_inner())?))
    }

    #[post("/purchase")]
    pub async fn purchase(
        app: web::Data<AppState>,
        req: web::Json<PurchaseRequest>,
    ) -> Result<web::Json<TradeResponse>, ApiError> {
        Ok(web::Json(app.purchase(req.into_inner()).await?))
    }

    #[post("/purchase_remote")]
    pub async fn purchase_remote(
        app: web::Data<AppState>,
        req: web::Json<PurchaseRemoteRequest>,
    ) -> Result<web::Json<TradeResponse>, ApiError> {
        Ok(web::Json(app.purchase_remote(req.into_inner()).await?))
    }

    #[post("/sell")]
    pub async fn sell(
        app: web::Data<AppState>,
        req: web::Json<SellRequest>,
    ) -> Result<web::Json<TradeResponse>, ApiError> {
        Ok(web::Json(app.sell(req.into_inner()).await?))
    }

    #[post("/sell_remote")]
    pub async fn sell_remote(
        app: web::Data<AppState>,
        req: web::Json<SellRemoteRequest>,
    ) -> Result<web::Json<TradeResponse>, ApiError> {
        Ok(web::Json(app.sell_remote(req.into_inner()).await?))
    }

    #[post("/shares")]
    pub async fn get_shares(
        app: web::Data<AppState>,
        req: web::Json<SharesRequest>,
    ) -> Result<web::Json<SharesResponse>, ApiError> {
        Ok(web::Json(app.get_shares(req.into_inner()).await))
    }

    #[get("/availability/{category}")]
    pub async fn list_availability(
        app: web::Data<AppState>,
        path: web::Path<(String,)>,
    ) -> Result<web::Json<AvailabilityResponse>, ApiError> {
        let (category,) = path.into_inner();
        Ok(web::Json(app.list_availability(&category).await))
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{test, web, App};

    use agora::market::{MarketError, MarketNode};
    use agora::peer::PeerDirectory;

    use super::server::*;
    use super::{
        AddInstrumentRequest, AddInstrumentResponse, AppState, PurchaseRequest, SellRequest,
        SharesRequest, SharesResponse, TradeResponse, TradeSide,
    };

    fn single_node() -> AppState {
        AppState::new(MarketNode::new("NewYork"), PeerDirectory::new())
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(routes),
            )
        };
    }

    #[actix_web::test]
    async fn test_that_trade_flow_round_trips_through_endpoints() {
        let app = test_app!(single_node()).await;

        let req = test::TestRequest::post()
            .uri("/instrument/add")
            .set_json(AddInstrumentRequest {
                id: "S1".to_string(),
                category: "Equity".to_string(),
                capacity: 100,
            })
            .to_request();
        let added: AddInstrumentResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(added.key.to_string(), "Equity-S1");

        let req = test::TestRequest::post()
            .uri("/purchase")
            .set_json(PurchaseRequest::new("NYKB1001", "Equity", "S1", 40))
            .to_request();
        let bought: TradeResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(bought.market, "NewYork");
        assert_eq!(bought.side, TradeSide::Purchase);
        assert!(!bought.forwarded);
        assert_eq!(
            bought.summary(),
            "Purchase successful. You bought 40 of Equity-S1"
        );

        let req = test::TestRequest::post()
            .uri("/shares")
            .set_json(SharesRequest::new("NYKB1001"))
            .to_request();
        let shares: SharesResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(shares.sections.len(), 1);
        assert_eq!(shares.sections[0].market, "NewYork");
        assert_eq!(shares.sections[0].holdings[0].owned, 40);

        let req = test::TestRequest::post()
            .uri("/sell")
            .set_json(SellRequest::new("NYKB1001", "S1", 40))
            .to_request();
        let sold: TradeResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(sold.key.category, "Equity");

        let req = test::TestRequest::post()
            .uri("/shares")
            .set_json(SharesRequest::new("NYKB1001"))
            .to_request();
        let shares: SharesResponse = test::call_and_read_body_json(&app, req).await;
        assert!(shares.sections.is_empty());
        assert_eq!(shares.render(), "You do not own any shares in any market.");
    }

    #[actix_web::test]
    async fn test_that_error_body_carries_tagged_variant() {
        let app = test_app!(single_node()).await;

        let add = AddInstrumentRequest {
            id: "S1".to_string(),
            category: "Equity".to_string(),
            capacity: 100,
        };
        let req = test::TestRequest::post()
            .uri("/instrument/add")
            .set_json(&add)
            .to_request();
        let _: AddInstrumentResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/instrument/add")
            .set_json(&add)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let err: MarketError = test::read_body_json(resp).await;
        assert!(matches!(err, MarketError::AlreadyExists { .. }));

        let req = test::TestRequest::post()
            .uri("/purchase")
            .set_json(PurchaseRequest::new("NYKB1001", "Equity", "S1", 101))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let err: MarketError = test::read_body_json(resp).await;
        assert!(matches!(
            err,
            MarketError::InsufficientCapacity {
                requested: 101,
                available: 100,
                ..
            }
        ));
    }

    #[actix_web::test]
    async fn test_that_relayed_miss_stays_local_and_originating_miss_searches_peers() {
        let app = test_app!(single_node()).await;

        // A relayed request must never trigger another hop, so the miss surfaces as a
        // plain local not-found.
        let mut relayed = PurchaseRequest::new("NYKB1001", "Equity", "S9", 10);
        relayed.relayed = true;
        let req = test::TestRequest::post()
            .uri("/purchase")
            .set_json(relayed)
            .to_request();
        let resp = test::call_service(&app, req).await;
        let err: MarketError = test::read_body_json(resp).await;
        assert!(matches!(err, MarketError::InstrumentNotFound { .. }));

        // An originating miss exhausts the (empty) peer directory first.
        let req = test::TestRequest::post()
            .uri("/purchase")
            .set_json(PurchaseRequest::new("NYKB1001", "Equity", "S9", 10))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let err: MarketError = test::read_body_json(resp).await;
        assert!(matches!(err, MarketError::NotFoundAnywhere { .. }));
    }

    #[actix_web::test]
    async fn test_that_remote_trade_rejects_unknown_target_market() {
        let app = test_app!(single_node()).await;

        let req = test::TestRequest::post()
            .uri("/purchase_remote")
            .set_json(super::PurchaseRemoteRequest {
                participant: "NYKB1001".to_string(),
                id: "S1".to_string(),
                category: "Equity".to_string(),
                qty: 10,
                target_market: "Paris".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let err: MarketError = test::read_body_json(resp).await;
        assert!(matches!(err, MarketError::InvalidMarket { .. }));
    }

    #[actix_web::test]
    async fn test_that_availability_omits_empty_markets() {
        let state = single_node();
        state
            .add_instrument(&AddInstrumentRequest {
                id: "S1".to_string(),
                category: "Equity".to_string(),
                capacity: 100,
            })
            .unwrap();
        let app = test_app!(state).await;

        let req = test::TestRequest::get()
            .uri("/availability/Equity")
            .to_request();
        let listing: super::AvailabilityResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listing.markets.len(), 1);
        assert_eq!(
            listing.render(),
            "NewYork Market:\n[Share ID: S1, Type: Equity, Available: 100]"
        );

        let req = test::TestRequest::get()
            .uri("/availability/Dividend")
            .to_request();
        let listing: super::AvailabilityResponse = test::call_and_read_body_json(&app, req).await;
        assert!(listing.markets.is_empty());
    }
}
