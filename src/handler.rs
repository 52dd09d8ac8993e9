//! One connection, start to finish: read the request, pick the response, send it, log it.

use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Shutdown, TcpStream};

use anyhow::{Context, Result};

use crate::access::{CheckAccess, DEFAULT_REALM};
use crate::date::{parse_if_modified_since, whole_seconds};
use crate::log::{AccessLog, AccessLogEntry};
use crate::request::Request;
use crate::resource::ResolveResource;
use crate::response::{RespondWith, Response, ServerId};

/// The response chosen for a request, and who asked for it.
#[derive(Debug)]
pub struct Decision {
    pub response: Response,
    /// `None` until credentials have been checked.
    pub username: Option<String>,
}

impl Decision {
    fn anonymous(response: Response) -> Self {
        Self {
            response,
            username: None,
        }
    }
}

/// Handles connections. Shared by every connection thread.
pub struct ConnectionHandler {
    resolver: Box<dyn ResolveResource>,
    access: Box<dyn CheckAccess>,
    responder: Box<dyn RespondWith>,
    log: AccessLog,
    server_id: ServerId,
}

impl ConnectionHandler {
    pub fn new(
        resolver: impl ResolveResource + 'static,
        access: impl CheckAccess + 'static,
        responder: impl RespondWith + 'static,
        log: AccessLog,
        server_id: ServerId,
    ) -> Self {
        Self {
            resolver: Box::new(resolver),
            access: Box::new(access),
            responder: Box::new(responder),
            log,
            server_id,
        }
    }

    /// Pick the response for `request`. `None` if the request never arrived in full, in which
    /// case nothing is sent or logged.
    pub fn decide(&self, request: &Request) -> Result<Option<Decision>> {
        if request.is_bad_request() {
            return Ok(Some(Decision::anonymous(Response::bad_request(
                &self.server_id,
            ))));
        }
        if !request.is_populated() {
            return Ok(None);
        }

        let resource = self.resolver.resolve(request)?;

        let mut username = None;
        if let Some(descriptor) = resource.access_file() {
            let credentials = match request.header("Authorization") {
                Some(credentials) => credentials,
                None => {
                    let realm = self.access.realm(descriptor).unwrap_or_else(|e| {
                        tracing::warn!(
                            "no realm from {}, using {}: {:#}",
                            descriptor.display(),
                            DEFAULT_REALM,
                            e
                        );
                        DEFAULT_REALM.to_string()
                    });
                    return Ok(Some(Decision::anonymous(Response::unauthorized(
                        &self.server_id,
                        &realm,
                    ))));
                }
            };
            let result = self.access.check(descriptor, credentials)?;
            tracing::debug!(
                user = %result.username,
                authorized = result.authorized,
                "checked credentials for {}",
                resource.url()
            );
            if !result.authorized {
                return Ok(Some(Decision {
                    response: Response::forbidden(&self.server_id),
                    username: Some(result.username),
                }));
            }
            username = Some(result.username);
        }

        if let Some(since) = request.header("If-Modified-Since") {
            let since = whole_seconds(parse_if_modified_since(since));
            if since > resource.last_modified() {
                return Ok(Some(Decision {
                    response: Response::not_modified(&self.server_id, resource.last_modified()),
                    username,
                }));
            }
        }

        let response = self.responder.respond(request, &resource)?;
        Ok(Some(Decision { response, username }))
    }

    /// Run one request/response exchange over `reader` and `writer`, logging it once sent.
    /// Returns the status and body length sent, or `None` if nothing was.
    pub fn exchange<R: BufRead, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        client: IpAddr,
    ) -> Result<Option<(u16, u64)>> {
        let request = Request::read_from(reader, client).context("failed to read request")?;
        let decision = match self.decide(&request)? {
            Some(decision) => decision,
            None => {
                tracing::debug!(%client, "connection closed before a full request arrived");
                return Ok(None);
            }
        };

        let status = decision.response.status_code();
        let bytes = decision.response.byte_length();
        decision
            .response
            .send(writer)
            .context("failed to send response")?;

        self.log.record(&AccessLogEntry {
            client,
            username: decision.username.as_deref(),
            method: request.method(),
            identifier: request.identifier(),
            version: request.version(),
            status,
            bytes,
        })?;
        Ok(Some((status, bytes)))
    }

    /// Serve one accepted connection and close it.
    pub fn serve(&self, stream: TcpStream) -> Result<()> {
        let client = stream
            .peer_addr()
            .context("failed to get peer address")?
            .ip();
        let mut reader = BufReader::new(&stream);
        let mut writer = &stream;
        self.exchange(&mut reader, &mut writer, client)?;
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            tracing::debug!(%client, "shutdown failed: {}", e);
        }
        Ok(())
    }
}
