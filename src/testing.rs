//! 測試用的記憶體內 CA、假時鐘與記錄呼叫的提供者。

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    hash::{hash, MessageDigest},
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Verifier,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req, X509},
};
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION},
    StatusCode,
};
use serde_json::{json, Value};

use crate::{
    backoff::{deadline_after, BackoffPolicy, Clock},
    base64::Base64,
    challenge::ChallengeType,
    directory::Directory,
    jwk::Jwk,
    jws::Jws,
    key_pair::{KeyPair, KeyType},
    problem::Problem,
    protection::ProtectedHeader,
    provider::{ChallengeProvider, ChallengeRegistry, ProviderError},
    session::Session,
    signer::RequestSigner,
    transport::{HttpResponse, Transport, TransportError},
};

const BASE: &str = "https://ca.test";
const ACME_ERROR: &str = "urn:ietf:params:acme:error:";

/// 某個網域的挑戰在 CA 端會得到的結果。
#[derive(Debug, Clone)]
pub enum Outcome {
    /// 通知 CA 後，第 n 次查詢授權時變為 `valid`。
    ValidAfter(u32),
    Invalid(Problem),
    NeverValid,
    /// 建立訂單時授權就已經是 `valid`。
    AlreadyValid,
}

/// finalize 被接受之後，訂單在 CA 端的走向。
#[derive(Debug, Clone, Default)]
pub enum FinalizeOutcome {
    /// 第二次查詢訂單時變為 `valid`。
    #[default]
    Issue,
    /// 第一次查詢訂單時變為 `invalid`，並附上這個問題。
    Invalid(Problem),
    /// 一直停在 `processing`。
    Stall,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub nonces_issued: u32,
    pub bad_nonce_rejections: u32,
    pub accounts_created: u32,
    pub orders_created: u32,
    pub posts: HashMap<String, u32>,
}

impl Stats {
    pub fn posts_to(&self, path: &str) -> u32 {
        self.posts.get(path).copied().unwrap_or(0)
    }

    pub fn posts_under(&self, prefix: &str) -> u32 {
        self.posts
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, count)| count)
            .sum()
    }
}

struct AccountRecord {
    url: String,
    jwk: Value,
    contact: Vec<String>,
}

struct AuthzRecord {
    domain: String,
    wildcard: bool,
    offered: Vec<ChallengeType>,
    outcome: Outcome,
    status: &'static str,
    triggered: Option<ChallengeType>,
    polls_since_trigger: u32,
}

struct OrderRecord {
    identifiers: Vec<String>,
    authz_ids: Vec<usize>,
    finalized: bool,
    polls_since_finalize: u32,
    certificate: Option<String>,
}

struct State {
    next_nonce: u64,
    outstanding_nonces: HashSet<String>,
    issued_nonces: HashSet<String>,
    reject_nonces: u32,
    fail_posts: u32,
    show_terms: bool,
    accounts: Vec<AccountRecord>,
    orders: Vec<OrderRecord>,
    authzs: Vec<AuthzRecord>,
    offered: HashMap<String, Vec<ChallengeType>>,
    outcomes: HashMap<String, Outcome>,
    finalize_problem: Option<Problem>,
    finalize_outcome: FinalizeOutcome,
    retry_after: Option<String>,
    csr_common_names: Vec<Option<String>>,
    triggered: Vec<(String, ChallengeType)>,
    stats: Stats,
}

/// 在記憶體中模擬 ACME CA，實作 [`Transport`]。
///
/// 會驗證每個請求的 nonce 與 JWS 簽名，並用自己的 CA 金鑰簽發真正的憑證。
pub struct FakeAuthority {
    state: Mutex<State>,
    ca_key: PKey<Private>,
    ca_cert: X509,
}

impl FakeAuthority {
    pub fn new() -> Self {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ca_key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "Fake ACME Root").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&ca_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(3650).unwrap())
            .unwrap();
        builder.sign(&ca_key, MessageDigest::sha256()).unwrap();

        Self {
            state: Mutex::new(State {
                next_nonce: 0,
                outstanding_nonces: HashSet::new(),
                issued_nonces: HashSet::new(),
                reject_nonces: 0,
                fail_posts: 0,
                show_terms: true,
                accounts: Vec::new(),
                orders: Vec::new(),
                authzs: Vec::new(),
                offered: HashMap::new(),
                outcomes: HashMap::new(),
                finalize_problem: None,
                finalize_outcome: FinalizeOutcome::default(),
                retry_after: None,
                csr_common_names: Vec::new(),
                triggered: Vec::new(),
                stats: Stats::default(),
            }),
            ca_key,
            ca_cert: builder.build(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", BASE, path)
    }

    pub fn directory_url(&self) -> String {
        self.url("/directory")
    }

    pub fn hide_terms_of_service(&self) {
        self.state().show_terms = false;
    }

    /// 直接建立帳戶並回傳帳戶 URL，省去註冊流程。
    pub fn register_key(&self, key_pair: &KeyPair) -> String {
        let jwk = serde_json::to_value(Jwk::new(key_pair).unwrap()).unwrap();
        let mut state = self.state();
        let url = self.url(&format!("/acct/{}", state.accounts.len() + 1));
        state.accounts.push(AccountRecord {
            url: url.clone(),
            jwk,
            contact: Vec::new(),
        });
        url
    }

    pub fn reject_next_nonces(&self, count: u32) {
        self.state().reject_nonces = count;
    }

    pub fn fail_next_posts(&self, count: u32) {
        self.state().fail_posts = count;
    }

    pub fn nonce_was_issued(&self, nonce: &str) -> bool {
        self.state().issued_nonces.contains(nonce)
    }

    pub fn stats(&self) -> Stats {
        self.state().stats.clone()
    }

    /// 設定某個網域提供的挑戰類型（預設為 HTTP-01 與 DNS-01）。
    pub fn offer(&self, domain: &str, types: &[ChallengeType]) {
        self.state()
            .offered
            .insert(domain.to_string(), types.to_vec());
    }

    /// 設定某個網域的驗證結果（預設為通知後第一次查詢即通過）。
    pub fn set_outcome(&self, domain: &str, outcome: Outcome) {
        self.state()
            .outcomes
            .insert(domain.to_string(), outcome);
    }

    pub fn reject_finalize(&self, problem: Problem) {
        self.state().finalize_problem = Some(problem);
    }

    pub fn set_finalize_outcome(&self, outcome: FinalizeOutcome) {
        self.state().finalize_outcome = outcome;
    }

    pub fn set_retry_after(&self, value: &str) {
        self.state().retry_after = Some(value.to_string());
    }

    /// 每次 finalize 收到的 CSR 中的 CN。
    pub fn csr_common_names(&self) -> Vec<Option<String>> {
        self.state().csr_common_names.clone()
    }

    /// 被通知驗證的挑戰，依通知順序排列。
    pub fn triggered_challenges(&self) -> Vec<(String, ChallengeType)> {
        self.state().triggered.clone()
    }

    pub fn root_certificate(&self) -> &X509 {
        &self.ca_cert
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn path<'u>(&self, url: &'u str) -> &'u str {
        url.strip_prefix(BASE).unwrap_or(url)
    }

    fn directory(&self, state: &State) -> HttpResponse {
        let mut directory = json!({
            "newNonce": self.url("/new-nonce"),
            "newAccount": self.url("/new-account"),
            "newOrder": self.url("/new-order"),
            "revokeCert": self.url("/revoke-cert"),
            "keyChange": self.url("/key-change"),
        });
        if state.show_terms {
            directory["meta"] = json!({
                "termsOfService": self.url("/terms"),
                "website": "https://ca.test",
            });
        }
        respond(200, &directory)
    }

    fn handle_post(&self, state: &mut State, url: &str, body: &str) -> HttpResponse {
        let path = self.path(url).to_string();

        let Ok(jws) = serde_json::from_str::<Jws>(body) else {
            return problem(400, "malformed", "request is not a flattened JWS");
        };
        let Some(header) = Base64::from_url(&jws.header)
            .ok()
            .and_then(|b| serde_json::from_slice::<ProtectedHeader>(b.as_bytes()).ok())
        else {
            return problem(400, "malformed", "protected header is not valid JSON");
        };
        if header.url != url {
            return problem(401, "unauthorized", "url in protected header does not match");
        }

        let known_nonce = state.outstanding_nonces.remove(&header.nonce);
        if !known_nonce || state.reject_nonces > 0 {
            state.reject_nonces = state.reject_nonces.saturating_sub(1);
            state.stats.bad_nonce_rejections += 1;
            return problem(400, "badNonce", "JWS has an invalid anti-replay nonce");
        }

        let jwk = match (&header.jwk, &header.kid) {
            (Some(jwk), None) if path == "/new-account" => jwk.clone(),
            (None, Some(kid)) if path != "/new-account" => {
                match state.accounts.iter().find(|a| &a.url == kid) {
                    Some(account) => account.jwk.clone(),
                    None => {
                        return problem(400, "accountDoesNotExist", "no account for this kid")
                    }
                }
            }
            _ => return problem(400, "malformed", "exactly one of jwk and kid is required"),
        };

        let signing_input = format!("{}.{}", jws.header, jws.payload);
        let signature = Base64::from_url(&jws.signature)
            .map(Base64::into_bytes)
            .unwrap_or_default();
        if !verify(&jwk, &header.alg, signing_input.as_bytes(), &signature) {
            return problem(400, "malformed", "JWS signature is invalid");
        }

        let payload = match Base64::from_url(&jws.payload) {
            Ok(p) if p.as_bytes().is_empty() => Value::Null,
            Ok(p) => match serde_json::from_slice(p.as_bytes()) {
                Ok(v) => v,
                Err(_) => return problem(400, "malformed", "payload is not JSON"),
            },
            Err(_) => return problem(400, "malformed", "payload is not base64url"),
        };

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match segments.as_slice() {
            ["new-account"] => self.new_account(state, jwk, &payload),
            ["new-order-probe"] => respond(200, &json!({})),
            ["new-order"] => self.new_order(state, &payload),
            ["order", id] => match parse_id(id, state.orders.len()) {
                Some(id) => {
                    let order = &mut state.orders[id];
                    if order.finalized {
                        order.polls_since_finalize += 1;
                    }
                    self.order_response(state, id, 200)
                }
                None => problem(404, "malformed", "no such order"),
            },
            ["authz", id] => match parse_id(id, state.authzs.len()) {
                Some(id) => self.poll_authz(state, id),
                None => problem(404, "malformed", "no such authorization"),
            },
            ["chall", id, kind] => match (parse_id(id, state.authzs.len()), kind.parse::<ChallengeType>()) {
                (Some(id), Ok(kind)) => self.trigger(state, id, kind),
                _ => problem(404, "malformed", "no such challenge"),
            },
            ["finalize", id] => match parse_id(id, state.orders.len()) {
                Some(id) => self.finalize(state, id, &payload),
                None => problem(404, "malformed", "no such order"),
            },
            ["cert", id] => match parse_id(id, state.orders.len())
                .and_then(|id| state.orders[id].certificate.clone())
            {
                Some(pem) => {
                    let mut response = raw(200, pem.into_bytes());
                    response.headers.insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("application/pem-certificate-chain"),
                    );
                    response
                }
                None => problem(404, "malformed", "no such certificate"),
            },
            _ => problem(404, "malformed", "unknown resource"),
        }
    }

    fn new_account(&self, state: &mut State, jwk: Value, payload: &Value) -> HttpResponse {
        if let Some(account) = state.accounts.iter().find(|a| a.jwk == jwk) {
            let mut response = respond(200, &json!({"status": "valid", "contact": account.contact}));
            set_location(&mut response, &account.url);
            return response;
        }

        if payload["termsOfServiceAgreed"] != json!(true) {
            let mut body = problem_body("userActionRequired", "must agree to terms of service");
            body["instance"] = json!(self.url("/terms"));
            return problem_response(403, &body);
        }

        let contact: Vec<String> = payload["contact"]
            .as_array()
            .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let url = self.url(&format!("/acct/{}", state.accounts.len() + 1));
        state.accounts.push(AccountRecord {
            url: url.clone(),
            jwk,
            contact: contact.clone(),
        });
        state.stats.accounts_created += 1;

        let mut response = respond(201, &json!({"status": "valid", "contact": contact}));
        set_location(&mut response, &url);
        response
    }

    fn new_order(&self, state: &mut State, payload: &Value) -> HttpResponse {
        let identifiers: Vec<String> = payload["identifiers"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|i| i["value"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if identifiers.is_empty() {
            return problem(400, "malformed", "order has no identifiers");
        }

        let mut authz_ids = Vec::new();
        for requested in &identifiers {
            let outcome = state
                .outcomes
                .get(requested)
                .cloned()
                .unwrap_or(Outcome::ValidAfter(1));
            let offered = state
                .offered
                .get(requested)
                .cloned()
                .unwrap_or_else(|| vec![ChallengeType::Http01, ChallengeType::Dns01]);
            let (domain, wildcard) = match requested.strip_prefix("*.") {
                Some(base) => (base.to_string(), true),
                None => (requested.clone(), false),
            };
            let status = if matches!(outcome, Outcome::AlreadyValid) {
                "valid"
            } else {
                "pending"
            };
            authz_ids.push(state.authzs.len());
            state.authzs.push(AuthzRecord {
                domain,
                wildcard,
                offered,
                outcome,
                status,
                triggered: None,
                polls_since_trigger: 0,
            });
        }

        let id = state.orders.len();
        state.orders.push(OrderRecord {
            identifiers,
            authz_ids,
            finalized: false,
            polls_since_finalize: 0,
            certificate: None,
        });
        state.stats.orders_created += 1;

        let mut response = self.order_response(state, id, 201);
        set_location(&mut response, &self.url(&format!("/order/{}", id)));
        response
    }

    fn order_status(&self, state: &State, id: usize) -> &'static str {
        let order = &state.orders[id];
        let statuses: Vec<&str> = order
            .authz_ids
            .iter()
            .map(|a| state.authzs[*a].status)
            .collect();
        if statuses.contains(&"invalid") {
            "invalid"
        } else if order.finalized {
            match &state.finalize_outcome {
                FinalizeOutcome::Invalid(_) if order.polls_since_finalize >= 1 => "invalid",
                FinalizeOutcome::Stall => "processing",
                _ if order.polls_since_finalize >= 2 => "valid",
                _ => "processing",
            }
        } else if statuses.iter().all(|s| *s == "valid") {
            "ready"
        } else {
            "pending"
        }
    }

    fn order_response(&self, state: &State, id: usize, status: u16) -> HttpResponse {
        let order = &state.orders[id];
        let order_status = self.order_status(state, id);
        let identifiers: Vec<Value> = order
            .identifiers
            .iter()
            .map(|d| json!({"type": "dns", "value": d}))
            .collect();
        let authorizations: Vec<String> = order
            .authz_ids
            .iter()
            .map(|a| self.url(&format!("/authz/{}", a)))
            .collect();
        let mut body = json!({
            "status": order_status,
            "expires": "2030-01-01T00:00:00Z",
            "identifiers": identifiers,
            "authorizations": authorizations,
            "finalize": self.url(&format!("/finalize/{}", id)),
        });
        if order_status == "valid" {
            body["certificate"] = json!(self.url(&format!("/cert/{}", id)));
        }
        if order_status == "invalid" {
            body["error"] = match (&state.finalize_outcome, order.finalized) {
                (FinalizeOutcome::Invalid(problem), true) => serde_json::to_value(problem).unwrap(),
                _ => problem_body("unauthorized", "an authorization failed"),
            };
        }
        respond(status, &body)
    }

    fn poll_authz(&self, state: &mut State, id: usize) -> HttpResponse {
        let authz = &mut state.authzs[id];
        if authz.triggered.is_some() && authz.status == "pending" {
            authz.polls_since_trigger += 1;
            match &authz.outcome {
                Outcome::ValidAfter(n) if authz.polls_since_trigger >= *n => authz.status = "valid",
                Outcome::Invalid(_) => authz.status = "invalid",
                _ => {}
            }
        }
        let pending = authz.status == "pending";

        let mut response = respond(200, &self.authz_body(&state.authzs[id], id));
        if let (true, Some(value)) = (pending, &state.retry_after) {
            response
                .headers
                .insert("retry-after", HeaderValue::from_str(value).unwrap());
        }
        response
    }

    fn authz_body(&self, authz: &AuthzRecord, id: usize) -> Value {
        let challenges: Vec<Value> = authz
            .offered
            .iter()
            .map(|kind| {
                let selected = authz.triggered == Some(*kind);
                let status = match (selected, authz.status) {
                    (true, "pending") => "processing",
                    (true, status) => status,
                    (false, _) => "pending",
                };
                let mut challenge = json!({
                    "type": kind.as_str(),
                    "url": self.url(&format!("/chall/{}/{}", id, kind)),
                    "status": status,
                    "token": format!("token-{}-{}", id, kind),
                });
                if let (true, Outcome::Invalid(problem)) = (status == "invalid", &authz.outcome) {
                    challenge["error"] = serde_json::to_value(problem).unwrap();
                }
                challenge
            })
            .collect();

        json!({
            "identifier": {"type": "dns", "value": authz.domain},
            "status": authz.status,
            "expires": "2030-01-01T00:00:00Z",
            "wildcard": authz.wildcard,
            "challenges": challenges,
        })
    }

    fn trigger(&self, state: &mut State, id: usize, kind: ChallengeType) -> HttpResponse {
        let authz = &mut state.authzs[id];
        if !authz.offered.contains(&kind) {
            return problem(404, "malformed", "challenge not offered");
        }
        if authz.triggered.is_none() {
            authz.triggered = Some(kind);
            let domain = authz.domain.clone();
            state.triggered.push((domain, kind));
        }
        let body = self.authz_body(&state.authzs[id], id);
        let challenge = body["challenges"]
            .as_array()
            .and_then(|c| c.iter().find(|c| c["type"] == kind.as_str()))
            .cloned()
            .unwrap_or(Value::Null);
        respond(200, &challenge)
    }

    fn finalize(&self, state: &mut State, id: usize, payload: &Value) -> HttpResponse {
        if self.order_status(state, id) != "ready" {
            return problem(403, "orderNotReady", "order is not ready for finalization");
        }
        if let Some(p) = &state.finalize_problem {
            return problem_response(403, &serde_json::to_value(p).unwrap());
        }

        let Some(req) = payload["csr"]
            .as_str()
            .and_then(|csr| Base64::from_url(csr).ok())
            .and_then(|der| X509Req::from_der(der.as_bytes()).ok())
        else {
            return problem(400, "badCSR", "CSR could not be decoded");
        };
        let public_key = req.public_key().unwrap();
        if !req.verify(&public_key).unwrap_or(false) {
            return problem(400, "badCSR", "CSR signature is invalid");
        }
        let common_name = req
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|e| e.data().as_utf8().ok())
            .map(|s| s.to_string());
        state.csr_common_names.push(common_name);

        let serial = state.orders.len() as u32 + 100;
        let order = &mut state.orders[id];
        order.certificate = Some(self.issue(&req, &order.identifiers, serial));
        order.finalized = true;
        self.order_response(state, id, 200)
    }

    fn issue(&self, req: &X509Req, names: &[String], serial: u32) -> String {
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder
            .set_serial_number(&BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap())
            .unwrap();
        builder.set_subject_name(req.subject_name()).unwrap();
        builder
            .set_issuer_name(self.ca_cert.subject_name())
            .unwrap();
        builder.set_pubkey(&req.public_key().unwrap()).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(90).unwrap())
            .unwrap();

        let mut san = SubjectAlternativeName::new();
        for name in names {
            san.dns(name);
        }
        let san = san
            .build(&builder.x509v3_context(Some(&self.ca_cert), None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&self.ca_key, MessageDigest::sha256()).unwrap();

        let mut pem = builder.build().to_pem().unwrap();
        pem.extend(self.ca_cert.to_pem().unwrap());
        String::from_utf8(pem).unwrap()
    }
}

impl Transport for FakeAuthority {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let state = self.state();
        Ok(match self.path(url) {
            "/directory" => self.directory(&state),
            _ => problem(404, "malformed", "not found"),
        })
    }

    fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        if self.path(url) != "/new-nonce" {
            return Ok(raw(404, Vec::new()));
        }
        let mut state = self.state();
        state.next_nonce += 1;
        let nonce = Base64::new(format!("nonce-{}", state.next_nonce)).base64_url();
        state.outstanding_nonces.insert(nonce.clone());
        state.issued_nonces.insert(nonce.clone());
        state.stats.nonces_issued += 1;

        let mut response = raw(200, Vec::new());
        response
            .headers
            .insert("replay-nonce", HeaderValue::from_str(&nonce).unwrap());
        Ok(response)
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let mut state = self.state();
        *state
            .stats
            .posts
            .entry(self.path(url).to_string())
            .or_default() += 1;
        if state.fail_posts > 0 {
            state.fail_posts -= 1;
            return Err(TransportError::Connection(
                "simulated connection reset".to_string(),
            ));
        }
        Ok(self.handle_post(&mut state, url, body))
    }
}

fn parse_id(value: &str, len: usize) -> Option<usize> {
    value.parse().ok().filter(|id| *id < len)
}

fn raw(status: u16, body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body,
    }
}

fn respond(status: u16, body: &Value) -> HttpResponse {
    let mut response = raw(status, serde_json::to_vec(body).unwrap());
    response
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn set_location(response: &mut HttpResponse, url: &str) {
    response
        .headers
        .insert(LOCATION, HeaderValue::from_str(url).unwrap());
}

fn problem_body(kind: &str, detail: &str) -> Value {
    json!({"type": format!("{}{}", ACME_ERROR, kind), "detail": detail})
}

fn problem(status: u16, kind: &str, detail: &str) -> HttpResponse {
    let mut body = problem_body(kind, detail);
    body["status"] = json!(status);
    problem_response(status, &body)
}

fn problem_response(status: u16, body: &Value) -> HttpResponse {
    let mut response = respond(status, body);
    response.headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/problem+json"),
    );
    response
}

/// 以 JWK 中的公鑰驗證 JWS 簽名。
fn verify(jwk: &Value, alg: &str, input: &[u8], signature: &[u8]) -> bool {
    verify_inner(jwk, alg, input, signature).unwrap_or(false)
}

fn verify_inner(jwk: &Value, alg: &str, input: &[u8], signature: &[u8]) -> Option<bool> {
    let member = |name: &str| -> Option<BigNum> {
        let bytes = Base64::from_url(jwk[name].as_str()?).ok()?;
        BigNum::from_slice(bytes.as_bytes()).ok()
    };

    match alg {
        "RS256" => {
            let rsa = Rsa::from_public_components(member("n")?, member("e")?).ok()?;
            let key = PKey::from_rsa(rsa).ok()?;
            let mut verifier = Verifier::new(MessageDigest::sha256(), &key).ok()?;
            verifier.update(input).ok()?;
            verifier.verify(signature).ok()
        }
        "ES256" | "ES384" => {
            let (nid, digest, len) = if alg == "ES256" {
                (Nid::X9_62_PRIME256V1, MessageDigest::sha256(), 32)
            } else {
                (Nid::SECP384R1, MessageDigest::sha384(), 48)
            };
            if signature.len() != len * 2 {
                return Some(false);
            }
            let group = EcGroup::from_curve_name(nid).ok()?;
            let key =
                EcKey::from_public_key_affine_coordinates(&group, &*member("x")?, &*member("y")?)
                    .ok()?;
            let sig = EcdsaSig::from_private_components(
                BigNum::from_slice(&signature[..len]).ok()?,
                BigNum::from_slice(&signature[len..]).ok()?,
            )
            .ok()?;
            let digest = hash(digest, input).ok()?;
            sig.verify(&digest, &key).ok()
        }
        _ => Some(false),
    }
}

/// 不會真的睡眠的時鐘，`sleep` 只會把時間往前推。
#[derive(Debug)]
pub struct FakeClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

/// 只記錄呼叫的提供者，可以指定某些網域的 `present` 失敗。
#[derive(Debug, Default)]
pub struct RecordingProvider {
    failing: HashSet<String>,
    presented: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
    key_authorizations: Mutex<Vec<String>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, domain: &str) -> Self {
        self.failing.insert(domain.to_string());
        self
    }

    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }

    pub fn cleaned_up(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }

    pub fn key_authorizations(&self) -> Vec<String> {
        self.key_authorizations.lock().unwrap().clone()
    }
}

impl ChallengeProvider for RecordingProvider {
    fn present(
        &self,
        domain: &str,
        _token: &str,
        key_authorization: &str,
    ) -> crate::provider::Result<()> {
        self.presented.lock().unwrap().push(domain.to_string());
        self.key_authorizations
            .lock()
            .unwrap()
            .push(key_authorization.to_string());
        if self.failing.contains(domain) {
            return Err(ProviderError::Api(format!("simulated failure for {}", domain)));
        }
        Ok(())
    }

    fn clean_up(
        &self,
        domain: &str,
        _token: &str,
        _key_authorization: &str,
    ) -> crate::provider::Result<()> {
        self.cleaned.lock().unwrap().push(domain.to_string());
        Ok(())
    }
}

/// 已在假 CA 註冊好帳戶的一組測試環境。
pub struct Harness {
    pub authority: Arc<FakeAuthority>,
    pub directory: Directory,
    pub signer: RequestSigner,
    pub key_pair: KeyPair,
    pub account_url: String,
    pub thumbprint: String,
    pub registry: ChallengeRegistry,
    pub backoff: BackoffPolicy,
    pub clock: FakeClock,
}

impl Harness {
    pub fn new(authority: FakeAuthority) -> Self {
        let authority = Arc::new(authority);
        let directory = Directory::fetch(authority.as_ref(), &authority.directory_url()).unwrap();
        let signer = RequestSigner::new(authority.clone(), &directory.new_nonce);
        let key_pair = KeyPair::generate(KeyType::Ec256).unwrap();
        let account_url = authority.register_key(&key_pair);
        let thumbprint = key_pair.thumbprint().unwrap();

        Self {
            authority,
            directory,
            signer,
            key_pair,
            account_url,
            thumbprint,
            registry: ChallengeRegistry::new(),
            backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(4),
                max_attempts: 10,
            },
            clock: FakeClock::new(),
        }
    }

    pub fn with_provider(
        mut self,
        challenge_type: ChallengeType,
        provider: Arc<dyn ChallengeProvider>,
    ) -> Self {
        self.registry.set_provider(challenge_type, provider);
        self
    }

    pub fn session(&self, timeout: Duration) -> Session<'_> {
        Session {
            signer: &self.signer,
            key_pair: &self.key_pair,
            account_url: &self.account_url,
            thumbprint: &self.thumbprint,
            registry: &self.registry,
            backoff: &self.backoff,
            clock: &self.clock,
            deadline: deadline_after(&self.clock, timeout),
        }
    }
}
