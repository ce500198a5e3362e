//! SBC bit allocation.
//!
//! Distributes the bitpool over subbands from their scale factors. Mono and
//! dual-channel frames allocate each channel separately with the full
//! bitpool; stereo and joint-stereo frames share one bitpool across both
//! channels, refining subband by subband with the channels interleaved.

use super::tables::{OFFSET_4, OFFSET_8};
use super::{Allocation, ChannelMode, SbcParams, MAX_SUBBANDS};

/// Most bits a single subband sample may take.
const MAX_BITS: i32 = 16;

/// Computes `bits[ch][sb]` for one frame.
pub(super) fn allocate(
    params: &SbcParams,
    scale_factors: &[[u8; MAX_SUBBANDS]; 2],
    bits: &mut [[u8; MAX_SUBBANDS]; 2],
) {
    // ---
    let subbands = usize::from(params.subbands);
    let bitpool = i32::from(params.bitpool);

    let mut need = [[0i32; MAX_SUBBANDS]; 2];
    for ch in 0..params.channel_mode.channels() {
        bitneed(params, &scale_factors[ch], &mut need[ch]);
    }

    match params.channel_mode {
        ChannelMode::Mono | ChannelMode::DualChannel => {
            for ch in 0..params.channel_mode.channels() {
                let mut out = [0i32; MAX_SUBBANDS];
                distribute(&need[ch][..subbands], bitpool, &mut out[..subbands]);
                for sb in 0..subbands {
                    bits[ch][sb] = out[sb] as u8;
                }
            }
        }
        ChannelMode::Stereo | ChannelMode::JointStereo => {
            // Interleaved so refinement walks sb0/ch0, sb0/ch1, sb1/ch0, ...
            let mut flat_need = [0i32; 2 * MAX_SUBBANDS];
            for sb in 0..subbands {
                flat_need[2 * sb] = need[0][sb];
                flat_need[2 * sb + 1] = need[1][sb];
            }

            let mut out = [0i32; 2 * MAX_SUBBANDS];
            distribute(&flat_need[..2 * subbands], bitpool, &mut out[..2 * subbands]);
            for sb in 0..subbands {
                bits[0][sb] = out[2 * sb] as u8;
                bits[1][sb] = out[2 * sb + 1] as u8;
            }
        }
    }
}

fn bitneed(params: &SbcParams, scale_factors: &[u8; MAX_SUBBANDS], need: &mut [i32; MAX_SUBBANDS]) {
    // ---
    let subbands = usize::from(params.subbands);
    let freq = params.frequency.index();

    for sb in 0..subbands {
        let sf = i32::from(scale_factors[sb]);
        need[sb] = match params.allocation {
            Allocation::Snr => sf,
            Allocation::Loudness if sf == 0 => -5,
            Allocation::Loudness => {
                let offset = if subbands == 4 {
                    OFFSET_4[freq][sb]
                } else {
                    OFFSET_8[freq][sb]
                };
                let loudness = sf - offset;
                if loudness > 0 {
                    loudness / 2
                } else {
                    loudness
                }
            }
        };
    }
}

/// Slices the bitpool over `need`; refinement follows slice order.
fn distribute(need: &[i32], bitpool: i32, bits: &mut [i32]) {
    // ---
    let max_need = need.iter().copied().max().unwrap_or(0);

    let mut bitcount = 0;
    let mut slicecount = 0;
    let mut bitslice = max_need + 1;
    loop {
        bitslice -= 1;
        bitcount += slicecount;
        slicecount = 0;
        for &n in need {
            if n > bitslice + 1 && n < bitslice + MAX_BITS {
                slicecount += 1;
            } else if n == bitslice + 1 {
                slicecount += 2;
            }
        }
        if bitcount + slicecount >= bitpool {
            break;
        }
    }

    if bitcount + slicecount == bitpool {
        bitcount += slicecount;
        bitslice -= 1;
    }

    for (b, &n) in bits.iter_mut().zip(need) {
        *b = if n < bitslice + 2 {
            0
        } else {
            (n - bitslice).min(MAX_BITS)
        };
    }

    let mut i = 0;
    while bitcount < bitpool && i < need.len() {
        if bits[i] >= 2 && bits[i] < MAX_BITS {
            bits[i] += 1;
            bitcount += 1;
        } else if need[i] == bitslice + 1 && bitpool > bitcount + 1 {
            bits[i] = 2;
            bitcount += 2;
        }
        i += 1;
    }

    i = 0;
    while bitcount < bitpool && i < need.len() {
        if bits[i] < MAX_BITS {
            bits[i] += 1;
            bitcount += 1;
        }
        i += 1;
    }
}
