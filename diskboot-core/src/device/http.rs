//! HTTP implementation of the device API.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Deserialize;

use super::{Device, DriveCommand, DriveMode, DriveStatus, MountRequest};
use crate::error::{BootError, BootResult};

const PASSWORD_HEADER: &str = "X-Password";

const MEMORY_TIMEOUT: Duration = Duration::from_secs(5);
const DRIVE_TIMEOUT: Duration = Duration::from_secs(5);
const RESET_TIMEOUT: Duration = Duration::from_secs(5);
const REBOOT_TIMEOUT: Duration = Duration::from_secs(15);
const MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Device reached over its REST API.
pub struct HttpDevice {
    client: Client,
    base_url: String,
    password: Option<String>,
}

impl HttpDevice {
    /// Create a client for `base_url` (e.g. `http://c64u`), sending `password` on every call.
    pub fn new(base_url: &str, password: Option<String>) -> BootResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            password,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        log::debug!("{} {}", method, path);
        let mut request = self.client.request(method, self.url(path)).timeout(timeout);
        if let Some(password) = &self.password {
            request = request.header(PASSWORD_HEADER, password);
        }
        request
    }

    fn send(&self, request: RequestBuilder) -> BootResult<Response> {
        Ok(request.send()?.error_for_status()?)
    }
}

fn hex_address(address: u16) -> String {
    format!("{:04X}", address)
}

impl HttpDevice {
    fn reset_request(&self) -> RequestBuilder {
        self.request(Method::PUT, "/v1/machine:reset", RESET_TIMEOUT)
    }

    fn reboot_request(&self) -> RequestBuilder {
        self.request(Method::PUT, "/v1/machine:reboot", REBOOT_TIMEOUT)
    }

    fn read_byte_request(&self, address: u16) -> RequestBuilder {
        self.request(Method::GET, "/v1/machine:readmem", MEMORY_TIMEOUT)
            .query(&[("address", hex_address(address)), ("length", "1".to_string())])
    }

    fn write_block_request(&self, address: u16, data: &[u8]) -> RequestBuilder {
        self.request(Method::POST, "/v1/machine:writemem", MEMORY_TIMEOUT)
            .query(&[("address", hex_address(address))])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
    }

    fn write_byte_request(&self, address: u16, value: u8) -> RequestBuilder {
        self.request(Method::PUT, "/v1/machine:writemem", MEMORY_TIMEOUT)
            .query(&[("address", hex_address(address)), ("data", format!("{:02X}", value))])
    }

    fn drive_status_request(&self) -> RequestBuilder {
        self.request(Method::GET, "/v1/drives", DRIVE_TIMEOUT)
    }

    fn set_drive_mode_request(&self, drive: &str, mode: DriveMode) -> RequestBuilder {
        let path = format!("/v1/drives/{}:set_mode", drive);
        self.request(Method::PUT, &path, DRIVE_TIMEOUT)
            .query(&[("mode", mode.as_str())])
    }

    fn drive_command_request(&self, drive: &str, command: DriveCommand) -> RequestBuilder {
        let path = format!("/v1/drives/{}:{}", drive, command.as_str());
        self.request(Method::PUT, &path, DRIVE_TIMEOUT)
    }

    fn upload_request(&self, drive: &str, request: &MountRequest<'_>) -> RequestBuilder {
        let path = format!("/v1/drives/{}:mount", drive);
        let part =
            multipart::Part::bytes(request.image.to_vec()).file_name(request.filename.to_string());
        let form = multipart::Form::new().part("file", part);
        self.request(Method::POST, &path, MOUNT_TIMEOUT)
            .query(&[("type", request.image_type), ("mode", request.mode.as_str())])
            .multipart(form)
    }
}

impl Device for HttpDevice {
    fn reset(&mut self) -> BootResult<()> {
        self.send(self.reset_request())?;
        Ok(())
    }

    fn reboot(&mut self) -> BootResult<()> {
        self.send(self.reboot_request())?;
        Ok(())
    }

    fn read_byte(&mut self, address: u16) -> BootResult<u8> {
        let body = self.send(self.read_byte_request(address))?.bytes()?;
        body.first().copied().ok_or_else(|| {
            BootError::Device(format!("empty readmem response for ${:04X}", address))
        })
    }

    fn write_block(&mut self, address: u16, data: &[u8]) -> BootResult<()> {
        self.send(self.write_block_request(address, data))?;
        Ok(())
    }

    fn write_byte(&mut self, address: u16, value: u8) -> BootResult<()> {
        self.send(self.write_byte_request(address, value))?;
        Ok(())
    }

    fn drive_status(&mut self) -> BootResult<Vec<DriveStatus>> {
        let body = self.send(self.drive_status_request())?.text()?;
        parse_drive_listing(&body)
    }

    fn set_drive_mode(&mut self, drive: &str, mode: DriveMode) -> BootResult<()> {
        self.send(self.set_drive_mode_request(drive, mode))?;
        Ok(())
    }

    fn drive_command(&mut self, drive: &str, command: DriveCommand) -> BootResult<()> {
        self.send(self.drive_command_request(drive, command))?;
        Ok(())
    }

    fn upload_image(&mut self, drive: &str, request: MountRequest<'_>) -> BootResult<()> {
        self.send(self.upload_request(drive, &request))?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct DriveListing {
    #[serde(default)]
    drives: Vec<BTreeMap<String, DriveInfo>>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct DriveInfo {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    bus_id: Option<i64>,
    #[serde(default, rename = "type")]
    drive_type: Option<String>,
}

/// Parse the body of `GET /v1/drives`.
///
/// ```json
/// { "drives": [ { "a": { "enabled": true, "bus_id": 8, "type": "1541" } } ], "errors": [] }
/// ```
pub fn parse_drive_listing(json: &str) -> BootResult<Vec<DriveStatus>> {
    let listing: DriveListing = serde_json::from_str(json)?;
    for error in &listing.errors {
        log::warn!("device reported: {}", error);
    }
    Ok(listing
        .drives
        .into_iter()
        .flat_map(|entry| entry.into_iter())
        .map(|(name, info)| DriveStatus {
            name,
            enabled: info.enabled,
            bus_id: info.bus_id,
            drive_type: info.drive_type,
        })
        .collect())
}
