// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provides the client implementations of the mechanisms.

mod anonymous;
mod digest_md5;
mod external;
mod plain;

pub use anonymous::Anonymous;
pub use digest_md5::DigestMd5;
pub use external::External;
pub use plain::Plain;
