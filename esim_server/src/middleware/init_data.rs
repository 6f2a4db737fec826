//! Init-data middleware for Actix Web.
//!
//! Every Mini App request carries Telegram's signed `initData` string in the `X-Telegram-Init-Data` header. This
//! middleware validates it against the bot token (see [`crate::auth`]) and, on success, stores the signing
//! [`TelegramUser`] in the request extensions, from where handlers extract it. Anything else is answered with 401.
//!
//! In development mode the init data may also be passed as the `init_data` query parameter, which is handy when
//! testing from a browser.

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
    HttpMessage,
};
use chrono::{Duration, Utc};
use esim_common::Secret;
use futures::future::LocalBoxFuture;
use log::{trace, warn};

use crate::{
    auth::{validate_init_data, AuthError, TelegramUser, INIT_DATA_HEADER, INIT_DATA_QUERY_PARAM},
    errors::ServerError,
};

#[derive(Clone)]
pub struct InitDataMiddlewareFactory {
    bot_token: Secret<String>,
    dev_mode: bool,
    max_age: Option<Duration>,
}

impl InitDataMiddlewareFactory {
    pub fn new(bot_token: Secret<String>, dev_mode: bool, max_age: Option<Duration>) -> Self {
        InitDataMiddlewareFactory { bot_token, dev_mode, max_age }
    }
}

impl<S, B> Transform<S, ServiceRequest> for InitDataMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = InitDataMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(InitDataMiddlewareService {
            bot_token: self.bot_token.clone(),
            dev_mode: self.dev_mode,
            max_age: self.max_age,
            service: Rc::new(service),
        }))
    }
}

pub struct InitDataMiddlewareService<S> {
    bot_token: Secret<String>,
    dev_mode: bool,
    max_age: Option<Duration>,
    service: Rc<S>,
}

/// The raw init data from the header, or from the query string in development mode.
fn raw_init_data(req: &ServiceRequest, dev_mode: bool) -> Option<String> {
    let header = req
        .headers()
        .get(INIT_DATA_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty());
    if header.is_some() || !dev_mode {
        return header;
    }
    url::form_urlencoded::parse(req.query_string().as_bytes())
        .find(|(k, _)| k == INIT_DATA_QUERY_PARAM)
        .map(|(_, v)| v.into_owned())
        .filter(|s| !s.trim().is_empty())
}

impl<S, B> Service<ServiceRequest> for InitDataMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let raw = raw_init_data(&req, self.dev_mode);
        let validated = raw
            .ok_or(AuthError::MissingInitData)
            .and_then(|raw| validate_init_data(&raw, self.bot_token.reveal(), self.max_age, Utc::now()));
        Box::pin(async move {
            match validated {
                Ok(init_data) => {
                    trace!("🔐️ Init data check for user {} ✅️", init_data.user.id);
                    req.extensions_mut().insert::<TelegramUser>(init_data.user);
                    service.call(req).await
                },
                Err(e) => {
                    warn!("🔐️ Denying access to {}. {e}", req.path());
                    Err(ServerError::from(e).into())
                },
            }
        })
    }
}
