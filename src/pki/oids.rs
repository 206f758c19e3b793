//! Object identifiers used by the codec and the CSR verifier.

use x509_parser::oid_registry::asn1_rs::{Oid, oid};

/// `rsaEncryption`
pub const RSA_ENCRYPTION: Oid<'static> = oid!(1.2.840 .113549 .1 .1 .1);
/// `id-ecPublicKey`
pub const EC_PUBLIC_KEY: Oid<'static> = oid!(1.2.840 .10045 .2 .1);
/// `secp256r1` / `prime256v1`
pub const SECP256R1: Oid<'static> = oid!(1.2.840 .10045 .3 .1 .7);
/// `secp384r1`
pub const SECP384R1: Oid<'static> = oid!(1.3.132 .0 .34);
/// `secp521r1`
pub const SECP521R1: Oid<'static> = oid!(1.3.132 .0 .35);

/// `sha1WithRSAEncryption`
pub const SHA1_WITH_RSA: Oid<'static> = oid!(1.2.840 .113549 .1 .1 .5);
/// `sha256WithRSAEncryption`
pub const SHA256_WITH_RSA: Oid<'static> = oid!(1.2.840 .113549 .1 .1 .11);
/// `sha384WithRSAEncryption`
pub const SHA384_WITH_RSA: Oid<'static> = oid!(1.2.840 .113549 .1 .1 .12);
/// `sha512WithRSAEncryption`
pub const SHA512_WITH_RSA: Oid<'static> = oid!(1.2.840 .113549 .1 .1 .13);

/// `ecdsa-with-SHA1`
pub const ECDSA_WITH_SHA1: Oid<'static> = oid!(1.2.840 .10045 .4 .1);
/// `ecdsa-with-SHA256`
pub const ECDSA_WITH_SHA256: Oid<'static> = oid!(1.2.840 .10045 .4 .3 .2);
/// `ecdsa-with-SHA384`
pub const ECDSA_WITH_SHA384: Oid<'static> = oid!(1.2.840 .10045 .4 .3 .3);
/// `ecdsa-with-SHA512`
pub const ECDSA_WITH_SHA512: Oid<'static> = oid!(1.2.840 .10045 .4 .3 .4);
