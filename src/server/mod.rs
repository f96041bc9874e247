// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network-facing front ends built on top of the driver core: the TCP
//! streaming server (`tcp`) and the UDP side-channel controller (`udp`).

pub mod tcp;
pub mod udp;
