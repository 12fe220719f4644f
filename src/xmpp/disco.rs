//! Service discovery (XEP-0030) used to locate the HTTP upload component.

use xmpp_parsers::disco::{DiscoInfoQuery, DiscoInfoResult, DiscoItemsQuery, DiscoItemsResult};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::jid::Jid;
use xmpp_parsers::ns;

use super::parse;
use super::session::Session;
use super::transport::StanzaTransport;
use crate::error::{Error, Result};

/// An HTTP upload service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadService {
    pub jid: Jid,
    pub max_file_size: Option<u64>,
}

impl UploadService {
    fn from_info(jid: &Jid, info: &DiscoInfoResult) -> Option<Self> {
        if !info.features.iter().any(|f| f.var == ns::HTTP_UPLOAD) {
            return None;
        }
        let max_file_size = extension_field(info, ns::HTTP_UPLOAD, "max-file-size")
            .and_then(|v| v.trim().parse().ok());
        Some(Self {
            jid: jid.clone(),
            max_file_size,
        })
    }
}

/// First value of `var` in the extension form (XEP-0128) with the given FORM_TYPE.
pub fn extension_field<'a>(info: &'a DiscoInfoResult, form_type: &str, var: &str) -> Option<&'a str> {
    info.extensions
        .iter()
        .find(|form| form.form_type.as_deref() == Some(form_type))
        .and_then(|form| form.fields.iter().find(|f| f.var.as_deref() == Some(var)))
        .and_then(|field| field.values.first())
        .map(String::as_str)
}

/// disco#info on an entity.
pub async fn info<T: StanzaTransport>(session: &mut Session<T>, to: &Jid) -> Result<DiscoInfoResult> {
    let iq = Iq::from_get(Session::<T>::next_id(), DiscoInfoQuery { node: None }).with_to(to.clone());
    let reply = session
        .request(iq)
        .await?
        .ok_or_else(|| Error::Protocol(format!("empty disco#info result from {}", to)))?;
    parse(reply)
}

/// disco#items on an entity, returning item JIDs.
pub async fn items<T: StanzaTransport>(session: &mut Session<T>, to: &Jid) -> Result<Vec<Jid>> {
    let query = DiscoItemsQuery { node: None, rsm: None };
    let iq = Iq::from_get(Session::<T>::next_id(), query).with_to(to.clone());
    match session.request(iq).await? {
        Some(reply) => {
            let result: DiscoItemsResult = parse(reply)?;
            Ok(result.items.into_iter().map(|item| item.jid).collect())
        }
        None => Ok(Vec::new()),
    }
}

/// Find the upload service on `domain` or one of its items.
pub async fn find_upload_service<T: StanzaTransport>(
    session: &mut Session<T>,
    domain: &Jid,
) -> Result<Option<UploadService>> {
    match info(session, domain).await {
        Ok(domain_info) => {
            if let Some(service) = UploadService::from_info(domain, &domain_info) {
                return Ok(Some(service));
            }
        }
        Err(Error::Protocol(e)) => tracing::debug!("unusable disco#info from {}: {}", domain, e),
        Err(e) => return Err(e),
    }

    for item in items(session, domain).await? {
        match info(session, &item).await {
            Ok(item_info) => {
                if let Some(service) = UploadService::from_info(&item, &item_info) {
                    tracing::debug!("upload service: {:?}", service);
                    return Ok(Some(service));
                }
            }
            Err(e) => tracing::debug!("disco#info on {} failed: {}", item, e),
        }
    }

    Ok(None)
}
