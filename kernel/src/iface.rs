// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

//! A minimal in-memory registry of named network interfaces.
//!
//! The spec's §1 explicitly treats PCI/device drivers as an external
//! collaborator, but the `ControlSocket` text protocol (`LIST`, `MAC`,
//! `HWTYPE`, `RAWSOCK`) is meaningless without *something* answering
//! those lookups, so this host-simulated store stands in for
//! `net::interface_store` in `cosix` (`original_source/fd/ifstoresock.cpp`
//! calls `get_interface_store()->get_interfaces()` /
//! `get_interface_store()->get_interface(name)`).

/// The kind of hardware an [`Interface`] reports through `HWTYPE`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HwType {
    Loopback,
    Ethernet,
    Unknown,
}

impl HwType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HwType::Loopback => "LOOPBACK",
            HwType::Ethernet => "ETHERNET",
            HwType::Unknown => "UNKNOWN",
        }
    }
}

/// One registered interface: a name, a hardware kind, and an optional MAC.
#[derive(Clone, Debug)]
pub struct Interface {
    name: String,
    hwtype: HwType,
    /// `None` for interfaces with no MAC (e.g. loopback): `MAC` then
    /// replies with the all-zero placeholder per spec §4.4.
    mac: Option<[u8; 6]>,
}

impl Interface {
    #[must_use]
    pub fn new(name: impl Into<String>, hwtype: HwType, mac: Option<[u8; 6]>) -> Self {
        Self {
            name: name.into(),
            hwtype,
            mac,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn hwtype(&self) -> HwType {
        self.hwtype
    }

    /// Lowercase, colon-separated hex, or the all-zero placeholder if
    /// this interface has no MAC.
    #[must_use]
    pub fn mac_string(&self) -> String {
        match self.mac {
            None => "00:00:00:00:00:00".to_string(),
            Some(bytes) => bytes
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":"),
        }
    }
}

/// The registry backing `LIST`/`MAC`/`HWTYPE`/`RAWSOCK`.
///
/// Interfaces are kept in insertion order; `LIST` replies in that same
/// order (spec §8 scenario 2: `"lo\neth0\n"`, `lo` first).
#[derive(Default)]
pub struct InterfaceStore {
    interfaces: Vec<Interface>,
}

impl InterfaceStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interfaces: Vec::new(),
        }
    }

    /// A store pre-populated with a loopback and one Ethernet interface,
    /// matching the fixture most of §8's boundary scenarios assume.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.register(Interface::new("lo", HwType::Loopback, None));
        store.register(Interface::new(
            "eth0",
            HwType::Ethernet,
            Some([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
        ));
        store
    }

    pub fn register(&mut self, iface: Interface) {
        self.interfaces.push(iface);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name() == name)
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }
}
