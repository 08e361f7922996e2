//! Generated types and service traits for the credential-broker gRPC
//! surface (C7). See `proto/credential_broker.proto`.

tonic::include_proto!("perikles.broker.v1");
