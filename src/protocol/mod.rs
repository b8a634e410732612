//! Wire formats spoken by the remote control transports.
//!
//! * [`vr`]: the "virtual remote" TCP protocol, `D\t<key>` / `U\t<key>`
//!   records separated by `\n\0`.
//! * [`lirc`]: the lircd Unix socket protocol, one text line per command or
//!   received code.

pub mod lirc;
pub mod vr;

pub use lirc::{decode_line as decode_lirc_line, encode_press as encode_lirc_press, LIRC_MAX_LINE};
pub use vr::{decode_key as decode_vr_key, encode_press as encode_vr_press, VrAction, VrCodec, VrRecord, VR_MAX_RECORD};
