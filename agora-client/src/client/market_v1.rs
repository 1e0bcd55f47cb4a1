use anyhow::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use agora::market::MarketError;
use agora_http::http::market_v1::{
    AddInstrumentRequest, AddInstrumentResponse, AppState, AvailabilityResponse, Client,
    PurchaseRemoteRequest, PurchaseRequest, RemoveInstrumentRequest, RemoveInstrumentResponse,
    SellRemoteRequest, SellRequest, SharesRequest, SharesResponse, TradeResponse,
};

//Error responses are decoded back into the tagged MarketError so callers can match
//on the failure kind
#[derive(Debug)]
pub struct HttpClient {
    pub path: String,
    pub client: reqwest::Client,
}

impl HttpClient {
    pub fn new(path: String) -> Self {
        Self {
            path,
            client: reqwest::Client::new(),
        }
    }

    async fn post<Req, Resp>(&self, endpoint: &str, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{endpoint}", self.path))
            .json(req)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<Resp>().await?)
        } else {
            Err(Error::new(response.json::<MarketError>().await?))
        }
    }

    //Raw shares query; lets callers set the relay flag to read a single node
    //without triggering peer aggregation
    pub async fn shares(&self, req: SharesRequest) -> Result<SharesResponse> {
        self.post("/shares", &req).await
    }
}

impl Client for HttpClient {
    async fn add_instrument(&self, req: AddInstrumentRequest) -> Result<AddInstrumentResponse> {
        self.post("/instrument/add", &req).await
    }

    async fn remove_instrument(
        &self,
        req: RemoveInstrumentRequest,
    ) -> Result<RemoveInstrumentResponse> {
        self.post("/instrument/remove", &req).await
    }

    async fn purchase(&self, req: PurchaseRequest) -> Result<TradeResponse> {
        self.post("/purchase", &req).await
    }

    async fn purchase_remote(&self, req: PurchaseRemoteRequest) -> Result<TradeResponse> {
        self.post("/purchase_remote", &req).await
    }

    async fn sell(&self, req: SellRequest) -> Result<TradeResponse> {
        self.post("/sell", &req).await
    }

    async fn sell_remote(&self, req: SellRemoteRequest) -> Result<TradeResponse> {
        self.post("/sell_remote", &req).await
    }

    async fn get_shares(&self, participant: String) -> Result<SharesResponse> {
        self.shares(SharesRequest::new(participant)).await
    }

    async fn list_availability(&self, category: String) -> Result<AvailabilityResponse> {
        let response = self
            .client
            .get(format!("{}/availability/{category}", self.path))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<AvailabilityResponse>().await?)
        } else {
            Err(Error::new(response.json::<MarketError>().await?))
        }
    }
}

//Drives a node's state directly, without a running server
pub struct LocalClient {
    state: Arc<AppState>,
}

impl LocalClient {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl Client for LocalClient {
    async fn add_instrument(&self, req: AddInstrumentRequest) -> Result<AddInstrumentResponse> {
        self.state.add_instrument(&req).map_err(Error::new)
    }

    async fn remove_instrument(
        &self,
        req: RemoveInstrumentRequest,
    ) -> Result<RemoveInstrumentResponse> {
        self.state.remove_instrument(&req).map_err(Error::new)
    }

    async fn purchase(&self, req: PurchaseRequest) -> Result<TradeResponse> {
        self.state.purchase(req).await.map_err(Error::new)
    }

    async fn purchase_remote(&self, req: PurchaseRemoteRequest) -> Result<TradeResponse> {
        self.state.purchase_remote(req).await.map_err(Error::new)
    }

    async fn sell(&self, req: SellRequest) -> Result<TradeResponse> {
        self.state.sell(req).await.map_err(Error::new)
    }

    async fn sell_remote(&self, req: SellRemoteRequest) -> Result<TradeResponse> {
        self.state.sell_remote(req).await.map_err(Error::new)
    }

    async fn get_shares(&self, participant: String) -> Result<SharesResponse> {
        Ok(self.state.get_shares(SharesRequest::new(participant)).await)
    }

    async fn list_availability(&self, category: String) -> Result<AvailabilityResponse> {
        Ok(self.state.list_availability(&category).await)
    }
}
